//! Sync engine behavior against the in-process mock service.

use boxoffice_core::{ErrorCode, EventQueue, ScanOutcome, ScanStatus};
use boxoffice_sync_engine::{
    MockTransport, RemoteService, RetryConfig, SyncConfig, SyncEngine, SyncError, SyncEvent,
    SyncResult, SyncState, SyncWorker,
};
use boxoffice_sync_protocol::{
    GetTicketRequest, ListSoldItemsRequest, ListSoldItemsResponse, PaymentMethod, ScanRejection,
    ScanVerdict, SoldItem, SubmitPurchasesRequest, SubmitPurchasesResponse, SubmitScanRequest,
    TicketRecord,
};
use boxoffice_testkit::prelude::*;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

fn engine_with(config: SyncConfig) -> SyncEngine<MockTransport> {
    SyncEngine::new(config, MockTransport::new(), Arc::new(memory_queue("summer-fest")))
}

fn engine() -> SyncEngine<MockTransport> {
    engine_with(SyncConfig::new())
}

#[test]
fn partial_batch_failure_leaves_only_failed_item_pending() {
    let engine = engine_with(SyncConfig::new().with_max_batch_size(2));
    let queue = engine.queue();
    queue.record_purchase(&[sale(3, 100)]).unwrap();
    queue.record_purchase(&[sale(4, 200)]).unwrap();
    let third = queue.record_purchase(&[sale(5, 300)]).unwrap();

    engine.transport().push_purchase_default();
    engine.transport().push_purchase_reply(Err(SyncError::Timeout));

    let report = engine.sync().unwrap();
    assert_eq!(report.items_accepted, 2);
    assert!(report.is_partial());
    assert_eq!(engine.transport().calls().submit_purchases, 2);

    let pending = queue.pending_items().list_pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].purchase_id, third.purchase_id);
    assert!(pending[0].error_text.as_deref().unwrap().contains("timed out"));
    assert_eq!(queue.rejections().list().unwrap().len(), 0);

    // Resubmitted on the next cycle.
    let report = engine.sync().unwrap();
    assert_eq!(report.items_accepted, 1);
    assert!(!report.is_partial());
    assert!(queue.pending_items().is_empty().unwrap());
    assert_eq!(engine.transport().sold_items().len(), 3);
    assert_eq!(engine.stats().transient_failures, 1);
    assert_eq!(engine.stats().items_uploaded, 3);
}

#[test]
fn invalid_seller_purchase_waits_for_operator() {
    let engine = engine();
    let queue = engine.queue();
    engine.transport().reject_seller(10);
    let purchase = queue.record_purchase(&[sale(10, 1200), sale(3, 800)]).unwrap();

    let report = engine.sync().unwrap();
    assert_eq!(report.items_rejected, 2);
    assert_eq!(report.purchases_rejected, 1);
    assert_eq!(report.needs_review, 1);
    assert!(queue.pending_items().is_empty().unwrap());

    let review = queue.review_queue().unwrap();
    assert_eq!(review.len(), 1);
    let rejected = &review[0];
    assert_eq!(rejected.purchase_id, purchase.purchase_id);
    assert_eq!(rejected.error_code, ErrorCode::InvalidSeller);
    assert!(rejected.items[0].is_primary_error());
    assert!(rejected.items[1].is_collateral_damage());
    assert_eq!(rejected.invalid_sellers(), vec![10]);

    // Not retried automatically.
    engine.sync().unwrap();
    assert_eq!(engine.transport().calls().submit_purchases, 1);

    // The operator fixes the seller and resubmits.
    let item_id = rejected.items[0].item.item_id.clone();
    queue
        .correct_seller(&purchase.purchase_id, &item_id, 3)
        .unwrap();
    assert_eq!(queue.resubmit(&purchase.purchase_id).unwrap(), 2);

    let report = engine.sync().unwrap();
    assert_eq!(report.items_accepted, 2);
    assert!(queue.rejections().list().unwrap().is_empty());
    assert_eq!(engine.pending_counts().unwrap().needs_review, 0);
}

#[test]
fn duplicate_receipt_is_discarded() {
    let engine = engine();
    let queue = engine.queue();
    let purchase = queue.record_purchase(&[sale(3, 500)]).unwrap();
    engine.transport().record_receipt(purchase.purchase_id.clone());

    let report = engine.sync().unwrap();
    assert_eq!(report.recovered, 1);
    assert!(queue.rejections().list().unwrap().is_empty());
    assert!(queue.pending_items().is_empty().unwrap());

    engine.sync().unwrap();
    assert_eq!(engine.transport().calls().submit_purchases, 1);
}

#[test]
fn unknown_rejection_retried_until_cap() {
    let engine = engine();
    let queue = engine.queue();
    let purchase = queue.record_purchase(&[sale(3, 500)]).unwrap();
    let item_id = purchase.items[0].item_id.clone();

    let refusal = || {
        Ok(SubmitPurchasesResponse {
            accepted: Vec::new(),
            rejected: vec![boxoffice_sync_protocol::RejectedItem {
                item_id: item_id.clone(),
                reason: "register closed".into(),
                error_code: boxoffice_sync_protocol::ErrorCode::Unknown,
            }],
        })
    };
    for _ in 0..5 {
        engine.transport().push_purchase_reply(refusal());
    }

    for _ in 0..5 {
        engine.sync().unwrap();
    }

    // Three failed attempts, then the purchase waits for an operator.
    assert_eq!(engine.transport().calls().submit_purchases, 3);
    let stored = queue.rejections().require(&purchase.purchase_id).unwrap();
    assert_eq!(stored.retry_attempts, 3);
    assert!(stored.needs_manual_review);
    assert!(queue.pending_items().is_empty().unwrap());
}

#[test]
fn missing_verdicts_stay_pending() {
    let engine = engine();
    let queue = engine.queue();
    let purchase = queue.record_purchase(&[sale(3, 500), sale(4, 600)]).unwrap();
    let first = &purchase.items[0];

    engine
        .transport()
        .push_purchase_reply(Ok(SubmitPurchasesResponse {
            accepted: vec![SoldItem {
                item_id: first.item_id.clone(),
                purchase_id: first.purchase_id.clone(),
                seller: first.seller_id,
                price: first.price,
                payment_method: PaymentMethod::Cash,
                sold_time: first.timestamp,
            }],
            rejected: Vec::new(),
        }));

    let report = engine.sync().unwrap();
    assert_eq!(report.items_accepted, 1);
    assert_eq!(report.missing_verdicts, 1);

    let pending = queue.pending_items().list_pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].item_id, purchase.items[1].item_id);
    assert!(pending[0].error_text.is_some());
    assert!(queue.rejections().list().unwrap().is_empty());
}

#[test]
fn scans_confirmed_and_duplicates_suppressed() {
    let engine = engine();
    let queue = engine.queue();

    assert!(matches!(queue.record_scan("T-1").unwrap(), ScanOutcome::Accepted(_)));
    assert!(matches!(queue.record_scan("T-1").unwrap(), ScanOutcome::Duplicate(_)));
    assert!(matches!(queue.record_scan("T-2").unwrap(), ScanOutcome::Accepted(_)));
    engine.transport().invalidate_ticket("T-2");

    let report = engine.sync().unwrap();
    assert_eq!(report.scans_committed, 1);
    assert_eq!(report.scans_rejected, 1);
    assert_eq!(engine.transport().calls().submit_scan, 2);
    assert!(queue.pending_scans().is_empty().unwrap());

    let history = queue.ledger().history().unwrap();
    let statuses: Vec<_> = history.iter().map(|c| (c.ticket_id.as_str(), c.status)).collect();
    assert!(statuses.contains(&("T-1", ScanStatus::Success)));
    assert!(statuses.contains(&("T-2", ScanStatus::Invalid)));
    let confirmed = history.iter().find(|c| c.status == ScanStatus::Success).unwrap();
    assert_eq!(confirmed.ticket_type.as_deref(), Some("general"));

    // Scanning again after the upload never reaches the service.
    assert!(matches!(queue.record_scan("T-1").unwrap(), ScanOutcome::Duplicate(_)));
    engine.sync().unwrap();
    assert_eq!(engine.transport().calls().submit_scan, 2);
}

#[test]
fn refused_scan_can_be_scanned_again() {
    let engine = engine();
    let queue = engine.queue();
    engine.transport().invalidate_ticket("T-9");
    assert!(matches!(queue.record_scan("T-9").unwrap(), ScanOutcome::Accepted(_)));

    let report = engine.sync().unwrap();
    assert_eq!(report.scans_rejected, 1);
    assert!(!queue.ledger().has_committed(queue.event_id(), "T-9").unwrap());

    assert!(matches!(queue.record_scan("T-9").unwrap(), ScanOutcome::Accepted(_)));
}

#[test]
fn error_verdict_releases_ticket() {
    let engine = engine();
    let queue = engine.queue();
    queue.record_scan("T-4").unwrap();
    engine.transport().push_scan_reply(Ok(ScanVerdict::Rejected {
        reason: ScanRejection::Error,
        message: "gate closed".into(),
    }));

    engine.sync().unwrap();
    assert!(matches!(queue.record_scan("T-4").unwrap(), ScanOutcome::Accepted(_)));

    let report = engine.sync().unwrap();
    assert_eq!(report.scans_committed, 1);
    assert_eq!(report.duplicates_suppressed, 0);
    assert!(queue.ledger().has_committed(queue.event_id(), "T-4").unwrap());
}

#[test]
fn refused_purchase_batch_does_not_hold_back_scans() {
    let engine = engine();
    let queue = engine.queue();
    queue.record_purchase(&[sale(3, 500)]).unwrap();
    queue.record_scan("T-1").unwrap();
    engine
        .transport()
        .push_purchase_reply(Err(SyncError::server(400, "malformed batch")));

    let err = engine.sync().unwrap_err();
    assert!(!err.is_transient());
    assert_eq!(engine.transport().calls().submit_scan, 1);
    assert!(queue.pending_scans().is_empty().unwrap());
    assert_eq!(engine.stats().scans_committed, 1);

    let pending = queue.pending_items().list_pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].error_text.as_deref().unwrap().contains("malformed batch"));
}

#[test]
fn refused_purchase_batch_does_not_hold_back_later_batches() {
    let engine = engine_with(SyncConfig::new().with_max_batch_size(1));
    let queue = engine.queue();
    let first = queue.record_purchase(&[sale(3, 100)]).unwrap();
    queue.record_purchase(&[sale(4, 200)]).unwrap();
    engine
        .transport()
        .push_purchase_reply(Err(SyncError::server(422, "unprocessable")));

    assert!(engine.sync().is_err());
    assert_eq!(engine.transport().calls().submit_purchases, 2);
    assert_eq!(engine.transport().sold_items().len(), 1);

    let pending = queue.pending_items().list_pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].purchase_id, first.purchase_id);

    let report = engine.sync().unwrap();
    assert_eq!(report.items_accepted, 1);
    assert_eq!(report.entries_failed, 0);
    assert!(queue.pending_items().is_empty().unwrap());
}

#[test]
fn second_pending_scan_of_a_ticket_is_resolved_locally() {
    let engine = engine();
    let queue = engine.queue();

    // Two pending scans of the same ticket, as left by a legacy import.
    let first = match queue.record_scan("T-7").unwrap() {
        ScanOutcome::Accepted(scan) => scan,
        ScanOutcome::Duplicate(_) => unreachable!(),
    };
    let mut second = first.clone();
    second.scan_id = "01J00000000000000000000002".into();
    queue.pending_scans().append(&second).unwrap();

    let report = engine.sync().unwrap();
    assert_eq!(report.scans_committed, 1);
    assert_eq!(report.duplicates_suppressed, 1);
    assert_eq!(engine.transport().calls().submit_scan, 1);
    assert_eq!(engine.stats().duplicates_suppressed, 1);
}

#[test]
fn transient_scan_failure_keeps_scan() {
    let engine = engine();
    let queue = engine.queue();
    queue.record_scan("T-1").unwrap();
    engine
        .transport()
        .push_scan_reply(Err(SyncError::server(503, "maintenance")));

    let report = engine.sync().unwrap();
    assert!(report.is_partial());
    let pending = queue.pending_scans().list_pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].error_text.as_deref().unwrap().contains("maintenance"));

    engine.sync().unwrap();
    assert!(queue.pending_scans().is_empty().unwrap());
}

#[test]
fn offline_service_leaves_everything_pending() {
    let engine = engine();
    let queue = engine.queue();
    queue.record_purchase(&[sale(3, 500)]).unwrap();
    queue.record_scan("T-1").unwrap();
    engine.transport().set_connected(false);

    let report = engine.sync().unwrap();
    assert!(report.is_partial());
    assert_eq!(engine.pending_counts().unwrap().unsynced(), 2);
    assert_eq!(engine.transport().calls().submit_scan, 0);
    assert_eq!(engine.state(), SyncState::Idle);
}

#[test]
fn refresh_pages_through_sold_items() {
    let engine = engine_with(SyncConfig::new().with_refresh_page_size(2));
    let queue = engine.queue();
    let local = queue.record_purchase(&[sale(3, 500), sale(3, 700)]).unwrap();

    // The service already holds the local purchase plus three sold elsewhere.
    for item in &local.items {
        engine.transport().add_sold_item(SoldItem {
            item_id: item.item_id.clone(),
            purchase_id: item.purchase_id.clone(),
            seller: item.seller_id,
            price: item.price,
            payment_method: PaymentMethod::Cash,
            sold_time: item.timestamp,
        });
    }
    for i in 0..3 {
        engine.transport().add_sold_item(SoldItem {
            item_id: format!("remote-{i}"),
            purchase_id: "remote".into(),
            seller: 8,
            price: 100,
            payment_method: PaymentMethod::DigitalWallet,
            sold_time: 1,
        });
    }

    let written = engine.refresh_sold_items().unwrap();
    assert_eq!(written, 5);
    assert_eq!(engine.transport().calls().list_sold_items, 3);
    assert!(queue.pending_items().is_empty().unwrap());

    let stored = queue.sold_items().list_pending().unwrap();
    assert_eq!(stored.len(), 5);
    assert!(stored.iter().all(|i| i.uploaded));

    // Nothing left to mark.
    assert_eq!(engine.refresh_sold_items().unwrap(), 0);
}

#[test]
fn ticket_lookup_after_scan() {
    let engine = engine();
    engine.queue().record_scan("T-9").unwrap();
    engine.sync().unwrap();

    let ticket = engine.lookup_ticket("T-9").unwrap();
    assert_eq!(ticket.ticket_id, "T-9");
    assert!(ticket.scanned_at.is_some());
    assert!(engine.lookup_ticket("T-404").is_err());
}

/// Cancels its engine while the first batch is in flight.
struct CancellingTransport {
    inner: MockTransport,
    engine: OnceLock<Weak<SyncEngine<CancellingTransport>>>,
}

impl RemoteService for CancellingTransport {
    fn submit_purchases(
        &self,
        request: &SubmitPurchasesRequest,
    ) -> SyncResult<SubmitPurchasesResponse> {
        if let Some(engine) = self.engine.get().and_then(Weak::upgrade) {
            engine.cancel();
        }
        self.inner.submit_purchases(request)
    }

    fn list_sold_items(&self, request: &ListSoldItemsRequest) -> SyncResult<ListSoldItemsResponse> {
        self.inner.list_sold_items(request)
    }

    fn submit_scan(&self, request: &SubmitScanRequest) -> SyncResult<ScanVerdict> {
        self.inner.submit_scan(request)
    }

    fn get_ticket(&self, request: &GetTicketRequest) -> SyncResult<TicketRecord> {
        self.inner.get_ticket(request)
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }
}

#[test]
fn cancellation_applies_between_batches() {
    let transport = CancellingTransport {
        inner: MockTransport::new(),
        engine: OnceLock::new(),
    };
    let queue = Arc::new(EventQueue::in_memory(event("summer-fest")));
    let engine = Arc::new(SyncEngine::new(
        SyncConfig::new().with_max_batch_size(1),
        transport,
        Arc::clone(&queue),
    ));
    assert!(engine.transport().engine.set(Arc::downgrade(&engine)).is_ok());

    queue.record_purchase(&[sale(3, 100)]).unwrap();
    queue.record_purchase(&[sale(4, 200)]).unwrap();

    let err = engine.sync().unwrap_err();
    assert!(matches!(err, SyncError::Cancelled));
    // The in-flight batch was applied in full; the next one never left.
    assert_eq!(engine.transport().inner.calls().submit_purchases, 1);
    assert_eq!(queue.pending_items().len().unwrap(), 1);
    assert_eq!(engine.state(), SyncState::Idle);
}

async fn next_event(events: &mut tokio::sync::mpsc::Receiver<SyncEvent>) -> SyncEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("sync event in time")
        .expect("worker running")
}

#[tokio::test]
async fn worker_syncs_on_start_and_on_reconnect() {
    let engine = Arc::new(engine_with(
        SyncConfig::new().with_sync_interval(Duration::from_secs(3600)),
    ));
    engine.queue().record_purchase(&[sale(3, 500)]).unwrap();

    let (handle, mut events) = SyncWorker::spawn(Arc::clone(&engine));
    match next_event(&mut events).await {
        SyncEvent::Completed(report) => assert_eq!(report.items_accepted, 1),
        other => panic!("unexpected event: {other:?}"),
    }

    handle.set_connected(false);
    engine.queue().record_purchase(&[sale(4, 600)]).unwrap();
    assert!(handle.trigger());
    let quiet = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
    assert!(quiet.is_err(), "no cycle runs while offline");

    handle.set_connected(true);
    match next_event(&mut events).await {
        SyncEvent::Completed(report) => assert_eq!(report.items_accepted, 1),
        other => panic!("unexpected event: {other:?}"),
    }

    handle.shutdown().await;
    assert_eq!(engine.stats().cycles_completed, 2);
}

#[tokio::test]
async fn worker_retries_after_transient_failure() {
    let retry = RetryConfig::new(3)
        .with_initial_delay(Duration::from_millis(10))
        .with_jitter(false);
    let engine = Arc::new(engine_with(
        SyncConfig::new()
            .with_sync_interval(Duration::from_secs(3600))
            .with_retry(retry),
    ));
    engine.queue().record_purchase(&[sale(3, 500)]).unwrap();
    engine.transport().push_purchase_reply(Err(SyncError::Timeout));

    let (handle, mut events) = SyncWorker::spawn(Arc::clone(&engine));
    match next_event(&mut events).await {
        SyncEvent::Completed(report) => assert!(report.is_partial()),
        other => panic!("unexpected event: {other:?}"),
    }
    match next_event(&mut events).await {
        SyncEvent::Completed(report) => {
            assert!(!report.is_partial());
            assert_eq!(report.items_accepted, 1);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    handle.shutdown().await;
    assert!(engine.queue().pending_items().is_empty().unwrap());
}
