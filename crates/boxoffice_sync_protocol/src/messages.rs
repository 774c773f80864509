//! Request and response messages of the remote service.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A request with a fixed endpoint and response type.
pub trait Rpc: Serialize {
    /// Endpoint path, relative to the service base URL.
    const PATH: &'static str;

    /// Response message.
    type Response: DeserializeOwned;
}

/// How a sold item was paid for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Not recorded.
    #[default]
    Unspecified,
    /// Card or phone wallet.
    DigitalWallet,
    /// Cash.
    Cash,
}

/// Structured rejection code of a sold item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// No code of its own.
    #[default]
    Unspecified,
    /// The seller number is not approved for the event.
    InvalidSeller,
    /// The receipt was already recorded.
    DuplicateReceipt,
    /// A code added after this build.
    #[serde(other)]
    Unknown,
}

/// A sold item as exchanged with the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoldItem {
    /// Item id assigned by the client.
    pub item_id: String,
    /// Purchase the item belongs to.
    pub purchase_id: String,
    /// Seller number.
    pub seller: i64,
    /// Price in minor currency units.
    pub price: i64,
    /// Payment method.
    #[serde(default)]
    pub payment_method: PaymentMethod,
    /// Sale time in epoch milliseconds.
    pub sold_time: u64,
}

/// Uploads a batch of sold items for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitPurchasesRequest {
    /// Event the items were sold at.
    pub event_id: String,
    /// Items in submission order.
    pub items: Vec<SoldItem>,
}

/// A sold item the service refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedItem {
    /// Id of the refused item.
    pub item_id: String,
    /// Human readable reason, empty when the item failed with a sibling.
    #[serde(default)]
    pub reason: String,
    /// Structured code.
    #[serde(default)]
    pub error_code: ErrorCode,
}

/// Verdicts for a purchase batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitPurchasesResponse {
    /// Items stored by the service.
    #[serde(default)]
    pub accepted: Vec<SoldItem>,
    /// Items refused by the service.
    #[serde(default)]
    pub rejected: Vec<RejectedItem>,
}

impl Rpc for SubmitPurchasesRequest {
    const PATH: &'static str = "/v1/purchases/submit";
    type Response = SubmitPurchasesResponse;
}

/// Lists the sold items the service knows for an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSoldItemsRequest {
    /// Event to list.
    pub event_id: String,
    /// Restricts the listing to one purchase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_id: Option<String>,
    /// Maximum number of items per page.
    pub page_size: u32,
    /// Token of the page to fetch; `None` for the first page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
}

/// One page of sold items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSoldItemsResponse {
    /// Items on this page.
    #[serde(default)]
    pub items: Vec<SoldItem>,
    /// Token of the following page.
    #[serde(default)]
    pub next_page_token: Option<String>,
    /// Token of the preceding page.
    #[serde(default)]
    pub prev_page_token: Option<String>,
}

impl Rpc for ListSoldItemsRequest {
    const PATH: &'static str = "/v1/purchases/list";
    type Response = ListSoldItemsResponse;
}

/// A ticket as known to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRecord {
    /// Ticket payload.
    pub ticket_id: String,
    /// Event the ticket is valid for.
    pub event_id: String,
    /// Ticket type, such as "adult" or "backstage".
    #[serde(default)]
    pub ticket_type: Option<String>,
    /// Holder email.
    #[serde(default)]
    pub email: Option<String>,
    /// Time of the first admission, if any.
    #[serde(default)]
    pub scanned_at: Option<u64>,
}

/// Uploads one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitScanRequest {
    /// Event the ticket was scanned at.
    pub event_id: String,
    /// Scanned payload.
    pub ticket_id: String,
    /// Scan time in epoch milliseconds.
    pub scanned_at: u64,
}

/// Why the service refused a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanRejection {
    /// The ticket was already admitted.
    Duplicate,
    /// The ticket does not exist or is not valid for the event.
    Invalid,
    /// Any other refusal.
    #[serde(other)]
    Error,
}

/// The service's verdict on a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ScanVerdict {
    /// The ticket was admitted.
    Accepted {
        /// The admitted ticket.
        ticket: TicketRecord,
    },
    /// The scan was refused.
    Rejected {
        /// Refusal kind.
        reason: ScanRejection,
        /// Human readable message.
        #[serde(default)]
        message: String,
    },
}

impl Rpc for SubmitScanRequest {
    const PATH: &'static str = "/v1/scans/submit";
    type Response = ScanVerdict;
}

/// Looks up one ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetTicketRequest {
    /// Event the ticket belongs to.
    pub event_id: String,
    /// Ticket payload.
    pub ticket_id: String,
}

impl Rpc for GetTicketRequest {
    const PATH: &'static str = "/v1/tickets/get";
    type Response = TicketRecord;
}

/// Body of a non-success HTTP response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error message.
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_are_distinct() {
        let paths = [
            SubmitPurchasesRequest::PATH,
            ListSoldItemsRequest::PATH,
            SubmitScanRequest::PATH,
            GetTicketRequest::PATH,
        ];
        for (i, a) in paths.iter().enumerate() {
            for b in &paths[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn defaults_for_empty_response() {
        let response = SubmitPurchasesResponse::default();
        assert!(response.accepted.is_empty());
        assert!(response.rejected.is_empty());
        assert_eq!(ErrorCode::default(), ErrorCode::Unspecified);
    }
}
