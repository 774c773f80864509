//! Transport layer abstraction for the remote service.

use crate::error::{SyncError, SyncResult};
use boxoffice_sync_protocol::{
    ErrorCode, GetTicketRequest, ListSoldItemsRequest, ListSoldItemsResponse, RejectedItem,
    ScanRejection, ScanVerdict, SoldItem, SubmitPurchasesRequest, SubmitPurchasesResponse,
    SubmitScanRequest, TicketRecord,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// The remote sales and ticketing service.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-process, mock for testing). Calls block; the
/// worker runs them off the async runtime.
pub trait RemoteService: Send + Sync {
    /// Uploads a batch of sold items and returns per-item verdicts.
    fn submit_purchases(&self, request: &SubmitPurchasesRequest)
        -> SyncResult<SubmitPurchasesResponse>;

    /// Lists one page of the sold items known for an event.
    fn list_sold_items(&self, request: &ListSoldItemsRequest) -> SyncResult<ListSoldItemsResponse>;

    /// Uploads one scan.
    fn submit_scan(&self, request: &SubmitScanRequest) -> SyncResult<ScanVerdict>;

    /// Looks up one ticket.
    fn get_ticket(&self, request: &GetTicketRequest) -> SyncResult<TicketRecord>;

    /// Checks if the service is believed reachable.
    fn is_connected(&self) -> bool;
}

impl<T: RemoteService + ?Sized> RemoteService for Arc<T> {
    fn submit_purchases(
        &self,
        request: &SubmitPurchasesRequest,
    ) -> SyncResult<SubmitPurchasesResponse> {
        (**self).submit_purchases(request)
    }

    fn list_sold_items(&self, request: &ListSoldItemsRequest) -> SyncResult<ListSoldItemsResponse> {
        (**self).list_sold_items(request)
    }

    fn submit_scan(&self, request: &SubmitScanRequest) -> SyncResult<ScanVerdict> {
        (**self).submit_scan(request)
    }

    fn get_ticket(&self, request: &GetTicketRequest) -> SyncResult<TicketRecord> {
        (**self).get_ticket(request)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}

/// Number of calls made to each endpoint of a [`MockTransport`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `submit_purchases` calls.
    pub submit_purchases: usize,
    /// `list_sold_items` calls.
    pub list_sold_items: usize,
    /// `submit_scan` calls.
    pub submit_scan: usize,
    /// `get_ticket` calls.
    pub get_ticket: usize,
}

/// An in-process stand-in for the remote service.
///
/// Unless a scripted reply is queued, the mock behaves like a small service:
/// purchases are accepted unless a seller is blocked or the receipt was
/// already recorded, and each ticket is admitted once.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    // `None` entries defer to the built-in behavior for that call.
    purchase_replies: Mutex<VecDeque<Option<SyncResult<SubmitPurchasesResponse>>>>,
    scan_replies: Mutex<VecDeque<Option<SyncResult<ScanVerdict>>>>,
    invalid_sellers: Mutex<HashSet<i64>>,
    recorded_receipts: Mutex<HashSet<String>>,
    invalid_tickets: Mutex<HashSet<String>>,
    sold: Mutex<Vec<SoldItem>>,
    admitted: Mutex<HashMap<String, TicketRecord>>,
    submit_purchases_calls: AtomicUsize,
    list_sold_items_calls: AtomicUsize,
    submit_scan_calls: AtomicUsize,
    get_ticket_calls: AtomicUsize,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Creates a connected mock with no scripted replies.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            purchase_replies: Mutex::new(VecDeque::new()),
            scan_replies: Mutex::new(VecDeque::new()),
            invalid_sellers: Mutex::new(HashSet::new()),
            recorded_receipts: Mutex::new(HashSet::new()),
            invalid_tickets: Mutex::new(HashSet::new()),
            sold: Mutex::new(Vec::new()),
            admitted: Mutex::new(HashMap::new()),
            submit_purchases_calls: AtomicUsize::new(0),
            list_sold_items_calls: AtomicUsize::new(0),
            submit_scan_calls: AtomicUsize::new(0),
            get_ticket_calls: AtomicUsize::new(0),
        }
    }

    /// Sets the connected state. A disconnected mock fails every call with
    /// [`SyncError::NotConnected`].
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Queues the reply of the next `submit_purchases` call.
    pub fn push_purchase_reply(&self, reply: SyncResult<SubmitPurchasesResponse>) {
        self.purchase_replies.lock().push_back(Some(reply));
    }

    /// Lets the next `submit_purchases` call behave normally even if later
    /// replies are scripted.
    pub fn push_purchase_default(&self) {
        self.purchase_replies.lock().push_back(None);
    }

    /// Queues the reply of the next `submit_scan` call.
    pub fn push_scan_reply(&self, reply: SyncResult<ScanVerdict>) {
        self.scan_replies.lock().push_back(Some(reply));
    }

    /// Makes the service refuse items sold by `seller`.
    pub fn reject_seller(&self, seller: i64) {
        self.invalid_sellers.lock().insert(seller);
    }

    /// Marks a purchase as already recorded upstream.
    pub fn record_receipt(&self, purchase_id: impl Into<String>) {
        self.recorded_receipts.lock().insert(purchase_id.into());
    }

    /// Makes the service refuse a ticket as invalid.
    pub fn invalidate_ticket(&self, ticket_id: impl Into<String>) {
        self.invalid_tickets.lock().insert(ticket_id.into());
    }

    /// Adds an item to the service's sold item listing.
    pub fn add_sold_item(&self, item: SoldItem) {
        self.sold.lock().push(item);
    }

    /// Returns every item the service has stored.
    pub fn sold_items(&self) -> Vec<SoldItem> {
        self.sold.lock().clone()
    }

    /// Returns the number of calls made so far.
    pub fn calls(&self) -> CallCounts {
        CallCounts {
            submit_purchases: self.submit_purchases_calls.load(Ordering::SeqCst),
            list_sold_items: self.list_sold_items_calls.load(Ordering::SeqCst),
            submit_scan: self.submit_scan_calls.load(Ordering::SeqCst),
            get_ticket: self.get_ticket_calls.load(Ordering::SeqCst),
        }
    }

    fn ensure_connected(&self) -> SyncResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SyncError::NotConnected)
        }
    }

    fn judge_purchases(&self, request: &SubmitPurchasesRequest) -> SubmitPurchasesResponse {
        let invalid_sellers = self.invalid_sellers.lock().clone();
        let mut receipts = self.recorded_receipts.lock();
        let mut sold = self.sold.lock();

        let mut purchase_ids: Vec<&str> = Vec::new();
        for item in &request.items {
            if !purchase_ids.contains(&item.purchase_id.as_str()) {
                purchase_ids.push(&item.purchase_id);
            }
        }

        let mut response = SubmitPurchasesResponse::default();
        for purchase_id in purchase_ids {
            let items: Vec<&SoldItem> = request
                .items
                .iter()
                .filter(|i| i.purchase_id == purchase_id)
                .collect();

            if receipts.contains(purchase_id) {
                response.rejected.extend(items.iter().map(|i| RejectedItem {
                    item_id: i.item_id.clone(),
                    reason: "receipt already recorded".into(),
                    error_code: ErrorCode::DuplicateReceipt,
                }));
                continue;
            }

            if items.iter().any(|i| invalid_sellers.contains(&i.seller)) {
                response.rejected.extend(items.iter().map(|i| {
                    if invalid_sellers.contains(&i.seller) {
                        RejectedItem {
                            item_id: i.item_id.clone(),
                            reason: format!("seller {} is not approved", i.seller),
                            error_code: ErrorCode::InvalidSeller,
                        }
                    } else {
                        RejectedItem {
                            item_id: i.item_id.clone(),
                            reason: String::new(),
                            error_code: ErrorCode::Unspecified,
                        }
                    }
                }));
                continue;
            }

            receipts.insert(purchase_id.to_string());
            for item in items {
                sold.push(item.clone());
                response.accepted.push(item.clone());
            }
        }
        response
    }
}

impl RemoteService for MockTransport {
    fn submit_purchases(
        &self,
        request: &SubmitPurchasesRequest,
    ) -> SyncResult<SubmitPurchasesResponse> {
        self.submit_purchases_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_connected()?;
        if let Some(Some(reply)) = self.purchase_replies.lock().pop_front() {
            return reply;
        }
        Ok(self.judge_purchases(request))
    }

    fn list_sold_items(&self, request: &ListSoldItemsRequest) -> SyncResult<ListSoldItemsResponse> {
        self.list_sold_items_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_connected()?;

        let matching: Vec<SoldItem> = self
            .sold
            .lock()
            .iter()
            .filter(|i| request.purchase_id.as_ref().map_or(true, |p| *p == i.purchase_id))
            .cloned()
            .collect();

        let offset: usize = match &request.page_token {
            Some(token) => token
                .parse()
                .map_err(|_| SyncError::server(400, format!("bad page token {token:?}")))?,
            None => 0,
        };
        let page_size = request.page_size.max(1) as usize;
        let end = (offset + page_size).min(matching.len());

        Ok(ListSoldItemsResponse {
            items: matching.get(offset..end).map(<[SoldItem]>::to_vec).unwrap_or_default(),
            next_page_token: (end < matching.len()).then(|| end.to_string()),
            prev_page_token: (offset > 0).then(|| offset.saturating_sub(page_size).to_string()),
        })
    }

    fn submit_scan(&self, request: &SubmitScanRequest) -> SyncResult<ScanVerdict> {
        self.submit_scan_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_connected()?;
        if let Some(Some(reply)) = self.scan_replies.lock().pop_front() {
            return reply;
        }

        if self.invalid_tickets.lock().contains(&request.ticket_id) {
            return Ok(ScanVerdict::Rejected {
                reason: ScanRejection::Invalid,
                message: "ticket not valid for this event".into(),
            });
        }

        let mut admitted = self.admitted.lock();
        if admitted.contains_key(&request.ticket_id) {
            return Ok(ScanVerdict::Rejected {
                reason: ScanRejection::Duplicate,
                message: "ticket already admitted".into(),
            });
        }

        let ticket = TicketRecord {
            ticket_id: request.ticket_id.clone(),
            event_id: request.event_id.clone(),
            ticket_type: Some("general".into()),
            email: None,
            scanned_at: Some(request.scanned_at),
        };
        admitted.insert(request.ticket_id.clone(), ticket.clone());
        Ok(ScanVerdict::Accepted { ticket })
    }

    fn get_ticket(&self, request: &GetTicketRequest) -> SyncResult<TicketRecord> {
        self.get_ticket_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_connected()?;
        self.admitted
            .lock()
            .get(&request.ticket_id)
            .cloned()
            .ok_or_else(|| SyncError::server(404, format!("unknown ticket {}", request.ticket_id)))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxoffice_sync_protocol::PaymentMethod;

    fn item(id: &str, purchase: &str, seller: i64) -> SoldItem {
        SoldItem {
            item_id: id.into(),
            purchase_id: purchase.into(),
            seller,
            price: 500,
            payment_method: PaymentMethod::Cash,
            sold_time: 1,
        }
    }

    fn request(items: Vec<SoldItem>) -> SubmitPurchasesRequest {
        SubmitPurchasesRequest {
            event_id: "ev".into(),
            items,
        }
    }

    #[test]
    fn mock_transport_not_connected_error() {
        let transport = MockTransport::new();
        transport.set_connected(false);

        let result = transport.submit_purchases(&request(vec![item("a", "p", 3)]));
        assert!(matches!(result, Err(SyncError::NotConnected)));
        assert_eq!(transport.calls().submit_purchases, 1);
    }

    #[test]
    fn blocked_seller_rejects_whole_purchase() {
        let transport = MockTransport::new();
        transport.reject_seller(10);

        let response = transport
            .submit_purchases(&request(vec![
                item("a", "p1", 10),
                item("b", "p1", 3),
                item("c", "p2", 3),
            ]))
            .unwrap();

        assert_eq!(response.accepted.len(), 1);
        assert_eq!(response.accepted[0].item_id, "c");
        assert_eq!(response.rejected[0].error_code, ErrorCode::InvalidSeller);
        assert_eq!(response.rejected[1].error_code, ErrorCode::Unspecified);
        assert!(response.rejected[1].reason.is_empty());
    }

    #[test]
    fn second_submission_is_duplicate_receipt() {
        let transport = MockTransport::new();
        transport.submit_purchases(&request(vec![item("a", "p1", 3)])).unwrap();

        let again = transport.submit_purchases(&request(vec![item("a", "p1", 3)])).unwrap();
        assert_eq!(again.rejected[0].error_code, ErrorCode::DuplicateReceipt);
    }

    #[test]
    fn scripted_reply_takes_precedence() {
        let transport = MockTransport::new();
        transport.push_purchase_reply(Err(SyncError::Timeout));

        let first = transport.submit_purchases(&request(vec![item("a", "p1", 3)]));
        assert!(matches!(first, Err(SyncError::Timeout)));
        assert!(transport.submit_purchases(&request(vec![item("a", "p1", 3)])).is_ok());
    }

    #[test]
    fn default_entry_defers_to_built_in_behavior() {
        let transport = MockTransport::new();
        transport.push_purchase_default();
        transport.push_purchase_reply(Err(SyncError::Timeout));

        assert!(transport.submit_purchases(&request(vec![item("a", "p1", 3)])).is_ok());
        assert!(transport.submit_purchases(&request(vec![item("b", "p2", 3)])).is_err());
        assert_eq!(transport.sold_items().len(), 1);
    }

    #[test]
    fn listing_pages() {
        let transport = MockTransport::new();
        for i in 0..5 {
            transport.add_sold_item(item(&format!("i{i}"), "p", 3));
        }

        let first = transport
            .list_sold_items(&ListSoldItemsRequest {
                event_id: "ev".into(),
                purchase_id: None,
                page_size: 2,
                page_token: None,
            })
            .unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.next_page_token.as_deref(), Some("2"));
        assert_eq!(first.prev_page_token, None);

        let last = transport
            .list_sold_items(&ListSoldItemsRequest {
                event_id: "ev".into(),
                purchase_id: None,
                page_size: 2,
                page_token: Some("4".into()),
            })
            .unwrap();
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.next_page_token, None);
    }

    #[test]
    fn tickets_admitted_once() {
        let transport = MockTransport::new();
        let scan = SubmitScanRequest {
            event_id: "ev".into(),
            ticket_id: "T-1".into(),
            scanned_at: 5,
        };

        assert!(matches!(
            transport.submit_scan(&scan).unwrap(),
            ScanVerdict::Accepted { .. }
        ));
        assert!(matches!(
            transport.submit_scan(&scan).unwrap(),
            ScanVerdict::Rejected {
                reason: ScanRejection::Duplicate,
                ..
            }
        ));

        let ticket = transport
            .get_ticket(&GetTicketRequest {
                event_id: "ev".into(),
                ticket_id: "T-1".into(),
            })
            .unwrap();
        assert_eq!(ticket.scanned_at, Some(5));
    }
}
