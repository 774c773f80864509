//! Queue record types.
//!
//! Every record is serialized as one self-describing JSON line. Optional
//! fields default when absent so older lines keep loading as fields are added.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub type Millis = u64;

/// Returns the current wall-clock time in milliseconds.
#[must_use]
pub fn now_millis() -> Millis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Identifier of the event a queue is scoped to.
///
/// Event ids name directories on disk, so only ASCII letters, digits, `-`
/// and `_` are accepted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Validates and wraps an event id.
    pub fn new(value: impl Into<String>) -> CoreResult<Self> {
        let value = value.into();
        let valid = !value.is_empty()
            && value.len() <= 128
            && value
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if valid {
            Ok(Self(value))
        } else {
            Err(CoreError::InvalidEventId { value })
        }
    }

    /// Returns the event id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a sold item was paid for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
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

/// Reads a legacy retry annotation, mapping the empty-string sentinel to `None`.
pub(crate) fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

/// A sold item waiting to be uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingItem {
    /// Unique id of this item.
    pub item_id: String,
    /// Id shared by every item of the same purchase.
    pub purchase_id: String,
    /// Seller number.
    pub seller_id: i64,
    /// Price in minor currency units.
    pub price: i64,
    /// Payment method.
    #[serde(default)]
    pub payment_method: PaymentMethod,
    /// Last transient failure, if any.
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub error_text: Option<String>,
    /// Creation time.
    pub timestamp: Millis,
}

/// A ticket scan waiting to be uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingScan {
    /// Unique id of this scan.
    pub scan_id: String,
    /// Scanned ticket payload.
    pub ticket_id: String,
    /// Event the ticket was scanned at.
    pub event_id: EventId,
    /// Scan time.
    pub scanned_at: Millis,
    /// Last transient failure, if any.
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub error_text: Option<String>,
}

/// Outcome recorded for a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanStatus {
    /// Confirmed by the remote service.
    Success,
    /// Ticket was already used.
    Duplicate,
    /// Ticket is not valid for the event.
    Invalid,
    /// Remote service refused the scan for another reason.
    Error,
    /// Accepted locally while offline, not yet confirmed.
    OfflineSuccess,
}

impl ScanStatus {
    /// Returns true if this outcome admits the ticket.
    ///
    /// Only admitting outcomes count when checking for duplicates.
    #[must_use]
    pub fn is_commit(&self) -> bool {
        matches!(self, ScanStatus::Success | ScanStatus::OfflineSuccess)
    }

    /// Returns true if this outcome withdraws an earlier admission of the
    /// same scan.
    ///
    /// `DUPLICATE` is not a refusal: the ticket was used, just not by this
    /// scan.
    #[must_use]
    pub fn is_refusal(&self) -> bool {
        matches!(self, ScanStatus::Invalid | ScanStatus::Error)
    }

    /// Returns the wire name of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Success => "SUCCESS",
            ScanStatus::Duplicate => "DUPLICATE",
            ScanStatus::Invalid => "INVALID",
            ScanStatus::Error => "ERROR",
            ScanStatus::OfflineSuccess => "OFFLINE_SUCCESS",
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scan outcome in the commit ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedScan {
    /// Scan that produced this outcome.
    pub scan_id: String,
    /// Scanned ticket payload.
    pub ticket_id: String,
    /// Event the ticket was scanned at.
    pub event_id: EventId,
    /// Scan time.
    pub scanned_at: Millis,
    /// Time the outcome was recorded.
    pub committed_at: Millis,
    /// True if the outcome was decided locally.
    pub was_offline: bool,
    /// Outcome.
    pub status: ScanStatus,
    /// Ticket type reported by the remote service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_type: Option<String>,
    /// Ticket holder email reported by the remote service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Rejection message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Durable copy of a sold item after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSoldItem {
    /// Unique id of this item.
    pub item_id: String,
    /// Event the item was sold at.
    pub event_id: EventId,
    /// Purchase the item belongs to.
    pub purchase_id: String,
    /// Seller number.
    pub seller: i64,
    /// Price in minor currency units.
    pub price: i64,
    /// Payment method.
    #[serde(default)]
    pub payment_method: PaymentMethod,
    /// Sale time.
    pub sold_time: Millis,
    /// True once the remote service accepted the item.
    pub uploaded: bool,
}

impl StoredSoldItem {
    /// Builds the stored form of a pending item.
    #[must_use]
    pub fn from_pending(event_id: &EventId, item: &PendingItem, uploaded: bool) -> Self {
        Self {
            item_id: item.item_id.clone(),
            event_id: event_id.clone(),
            purchase_id: item.purchase_id.clone(),
            seller: item.seller_id,
            price: item.price,
            payment_method: item.payment_method,
            sold_time: item.timestamp,
            uploaded,
        }
    }

    /// Converts back into a pending item for resubmission.
    #[must_use]
    pub fn to_pending(&self) -> PendingItem {
        PendingItem {
            item_id: self.item_id.clone(),
            purchase_id: self.purchase_id.clone(),
            seller_id: self.seller,
            price: self.price,
            payment_method: self.payment_method,
            error_text: None,
            timestamp: self.sold_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_validation() {
        assert!(EventId::new("summer-fest_2026").is_ok());
        assert!(EventId::new("").is_err());
        assert!(EventId::new("../etc").is_err());
        assert!(EventId::new("a/b").is_err());
    }

    #[test]
    fn empty_error_text_reads_as_none() {
        let line = r#"{"item_id":"a","purchase_id":"p","seller_id":3,"price":500,"error_text":"","timestamp":1}"#;
        let item: PendingItem = serde_json::from_str(line).unwrap();
        assert_eq!(item.error_text, None);
        assert_eq!(item.payment_method, PaymentMethod::Unspecified);
    }

    #[test]
    fn error_text_is_omitted_when_none() {
        let item = PendingItem {
            item_id: "a".into(),
            purchase_id: "p".into(),
            seller_id: 3,
            price: 500,
            payment_method: PaymentMethod::Cash,
            error_text: None,
            timestamp: 1,
        };
        let line = serde_json::to_string(&item).unwrap();
        assert!(!line.contains("error_text"));
        assert!(line.contains(r#""payment_method":"cash""#));
    }

    #[test]
    fn scan_status_wire_names() {
        let json = serde_json::to_string(&ScanStatus::OfflineSuccess).unwrap();
        assert_eq!(json, r#""OFFLINE_SUCCESS""#);
        assert!(ScanStatus::Success.is_commit());
        assert!(ScanStatus::OfflineSuccess.is_commit());
        assert!(!ScanStatus::Duplicate.is_commit());
        assert!(!ScanStatus::Invalid.is_commit());

        assert!(ScanStatus::Invalid.is_refusal());
        assert!(ScanStatus::Error.is_refusal());
        assert!(!ScanStatus::Duplicate.is_refusal());
        assert!(!ScanStatus::OfflineSuccess.is_refusal());
    }

    #[test]
    fn sold_item_roundtrips_through_pending() {
        let event = EventId::new("ev1").unwrap();
        let pending = PendingItem {
            item_id: "i".into(),
            purchase_id: "p".into(),
            seller_id: 10,
            price: 1250,
            payment_method: PaymentMethod::DigitalWallet,
            error_text: Some("timeout".into()),
            timestamp: 42,
        };
        let stored = StoredSoldItem::from_pending(&event, &pending, true);
        assert!(stored.uploaded);
        assert_eq!(stored.sold_time, 42);

        let back = stored.to_pending();
        assert_eq!(back.error_text, None);
        assert_eq!(back.seller_id, 10);
    }
}
