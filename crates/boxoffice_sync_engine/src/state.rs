//! Sync engine state machine.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::RemoteService;
use crate::wire;
use boxoffice_core::{
    classify, now_millis, EventQueue, PendingCounts, PendingItem, PendingScan, RecoveryResult,
    RejectedItemWithDetails, ScanStatus, StoredSoldItem,
};
use boxoffice_sync_protocol::{
    GetTicketRequest, ListSoldItemsRequest, ScanVerdict, SubmitPurchasesRequest,
    SubmitPurchasesResponse, SubmitScanRequest, TicketRecord,
};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Engine is idle, not syncing.
    Idle,
    /// Engine is reading pending entries.
    Draining,
    /// A request is in flight.
    Submitting,
    /// Verdicts are being written back to the queue.
    Applying,
}

impl SyncState {
    /// Returns true if the engine is in an active sync state.
    pub fn is_active(&self) -> bool {
        !matches!(self, SyncState::Idle)
    }

    /// Returns true if the engine can start a new sync.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, SyncState::Idle)
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of sync cycles completed.
    pub cycles_completed: u64,
    /// Sold items accepted by the service.
    pub items_uploaded: u64,
    /// Sold items refused by the service.
    pub items_rejected: u64,
    /// Scans confirmed by the service.
    pub scans_committed: u64,
    /// Scans answered as duplicates without contacting the service.
    pub duplicates_suppressed: u64,
    /// Cycles stopped by a transient failure.
    pub transient_failures: u64,
    /// Last sync time.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of a sync cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Purchases re-entered from the rejection store at cycle start.
    pub resubmitted: usize,
    /// Sold items accepted.
    pub items_accepted: usize,
    /// Sold items refused, primary and collateral.
    pub items_rejected: usize,
    /// Purchases written to the rejection store.
    pub purchases_rejected: usize,
    /// Purchases that now wait for an operator.
    pub needs_review: usize,
    /// Purchases resolved by automatic recovery.
    pub recovered: usize,
    /// Purchases whose automatic recovery failed.
    pub recovery_failed: usize,
    /// Submitted items the response said nothing about.
    pub missing_verdicts: usize,
    /// Scans confirmed by the service.
    pub scans_committed: usize,
    /// Scans refused by the service.
    pub scans_rejected: usize,
    /// Scans answered as duplicates locally.
    pub duplicates_suppressed: usize,
    /// Entries left pending by a non-transient failure.
    pub entries_failed: usize,
    /// The transient failure that stopped the cycle early, if any.
    pub transient_error: Option<String>,
    /// Duration of the sync cycle.
    pub duration: Duration,
}

impl SyncReport {
    /// Returns true if the cycle stopped on a transient failure.
    pub fn is_partial(&self) -> bool {
        self.transient_error.is_some()
    }
}

/// The sync engine uploads the offline queue of one event.
pub struct SyncEngine<T: RemoteService> {
    config: SyncConfig,
    transport: Arc<T>,
    queue: Arc<EventQueue>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    cancelled: AtomicBool,
}

impl<T: RemoteService> SyncEngine<T> {
    /// Creates a new sync engine.
    pub fn new(config: SyncConfig, transport: T, queue: Arc<EventQueue>) -> Self {
        Self {
            config,
            transport: Arc::new(transport),
            queue,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Gets the queue being drained.
    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns the aggregate not-yet-synced counts of the queue.
    pub fn pending_counts(&self) -> SyncResult<PendingCounts> {
        Ok(self.queue.pending_counts()?)
    }

    /// Cancels any ongoing sync operation.
    ///
    /// The cycle stops before its next batch; a batch whose verdicts are
    /// being applied always completes.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Resets the cancelled flag.
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    fn begin(&self) -> SyncResult<()> {
        let mut state = self.state.write();
        if !state.can_start_sync() {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{:?}", *state),
                to: format!("{:?}", SyncState::Draining),
            });
        }
        *state = SyncState::Draining;
        Ok(())
    }

    /// Performs a full sync cycle: sold items first, then scans.
    ///
    /// A transient failure stops the cycle early but is not an error: the
    /// affected entries stay pending and the report carries the failure.
    ///
    /// A non-transient failure only holds back the batch or scan it hit. The
    /// rest of both journals is still uploaded, then the first such failure
    /// is returned.
    pub fn sync(&self) -> SyncResult<SyncReport> {
        let start = Instant::now();
        self.begin()?;
        self.reset_cancel();

        let mut report = SyncReport::default();
        let result = self.run_cycle(&mut report);
        report.duration = start.elapsed();
        self.set_state(SyncState::Idle);

        {
            let mut stats = self.stats.write();
            stats.items_uploaded += report.items_accepted as u64;
            stats.items_rejected += report.items_rejected as u64;
            stats.scans_committed += report.scans_committed as u64;
            stats.duplicates_suppressed += report.duplicates_suppressed as u64;
        }

        match result {
            Ok(()) => {
                {
                    let mut stats = self.stats.write();
                    stats.cycles_completed += 1;
                    stats.last_sync_time = Some(Instant::now());
                    stats.last_error = report.transient_error.clone();
                }
                info!(
                    event_id = %self.queue.event_id(),
                    accepted = report.items_accepted,
                    rejected = report.items_rejected,
                    scans = report.scans_committed,
                    partial = report.is_partial(),
                    elapsed_ms = report.duration.as_millis() as u64,
                    "sync cycle finished"
                );
                Ok(report)
            }
            Err(e) => {
                self.handle_error(&e);
                Err(e)
            }
        }
    }

    fn run_cycle(&self, report: &mut SyncReport) -> SyncResult<()> {
        if self.config.auto_recover {
            report.resubmitted = self.queue.resubmit_eligible()?.len();
        }

        let mut failure = None;
        if self.drain_items(report, &mut failure)? {
            self.drain_scans(report, &mut failure)?;
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Uploads pending sold items. Returns false if a transient failure
    /// stopped the drain.
    ///
    /// A batch refused for any other reason stays pending and the drain moves
    /// on; the first such error is kept in `failure`.
    fn drain_items(
        &self,
        report: &mut SyncReport,
        failure: &mut Option<SyncError>,
    ) -> SyncResult<bool> {
        self.set_state(SyncState::Draining);
        let pending = self.queue.pending_items().list_pending()?;
        if pending.is_empty() {
            return Ok(true);
        }

        for batch in batch_by_purchase(pending, self.config.max_batch_size) {
            self.check_cancelled()?;

            self.set_state(SyncState::Submitting);
            let request = SubmitPurchasesRequest {
                event_id: self.queue.event_id().as_str().to_string(),
                items: batch.iter().map(wire::item_to_wire).collect(),
            };
            debug!(
                event_id = %self.queue.event_id(),
                items = batch.len(),
                "submitting purchase batch"
            );

            let response = match self.transport.submit_purchases(&request) {
                Ok(response) => response,
                Err(e) => {
                    let ids: Vec<&str> = batch.iter().map(|i| i.item_id.as_str()).collect();
                    self.queue
                        .pending_items()
                        .annotate_many(&ids, &retry_hint(&e))?;
                    if e.is_transient() {
                        self.note_transient(report, &e, ids.len());
                        return Ok(false);
                    }
                    self.note_failure(report, failure, e, ids.len());
                    self.set_state(SyncState::Draining);
                    continue;
                }
            };

            self.set_state(SyncState::Applying);
            self.apply_purchase_verdicts(&batch, response, report)?;
            self.set_state(SyncState::Draining);
        }
        Ok(true)
    }

    fn apply_purchase_verdicts(
        &self,
        batch: &[PendingItem],
        response: SubmitPurchasesResponse,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let event_id = self.queue.event_id();
        let by_id: HashMap<&str, &PendingItem> =
            batch.iter().map(|i| (i.item_id.as_str(), i)).collect();
        let mut resolved: HashSet<&str> = HashSet::new();

        let mut accepted = Vec::new();
        for sold in &response.accepted {
            match by_id.get(sold.item_id.as_str()) {
                Some(item) if resolved.insert(item.item_id.as_str()) => {
                    accepted.push(StoredSoldItem::from_pending(event_id, item, true));
                }
                Some(_) => {}
                None => debug!(item_id = %sold.item_id, "verdict for an item not in the batch"),
            }
        }

        let mut rejected = Vec::new();
        for verdict in &response.rejected {
            match by_id.get(verdict.item_id.as_str()) {
                Some(item) if resolved.insert(item.item_id.as_str()) => {
                    rejected.push(RejectedItemWithDetails::new(
                        StoredSoldItem::from_pending(event_id, item, false),
                        verdict.reason.clone(),
                        wire::error_code_from_wire(verdict.error_code),
                    ));
                }
                Some(_) => {}
                None => debug!(item_id = %verdict.item_id, "verdict for an item not in the batch"),
            }
        }

        // Sold items are persisted before anything leaves the pending journal.
        if !accepted.is_empty() {
            self.queue.sold_items().upsert_many(&accepted)?;
        }
        report.items_accepted += accepted.len();
        report.items_rejected += rejected.len();

        let rejected_purchases: HashSet<String> =
            rejected.iter().map(|r| r.item.purchase_id.clone()).collect();
        for purchase in classify(rejected, now_millis()) {
            let merged = self.queue.rejections().merge(purchase)?;
            report.purchases_rejected += 1;

            if !self.config.auto_recover {
                if merged.needs_manual_review {
                    report.needs_review += 1;
                }
                continue;
            }
            match self.queue.recover(merged)? {
                RecoveryResult::Success => report.recovered += 1,
                RecoveryResult::NeedsManualReview(_) => report.needs_review += 1,
                RecoveryResult::Failed(_) => report.recovery_failed += 1,
            }
        }

        let resolved_ids: Vec<&str> = resolved.iter().copied().collect();
        self.queue.pending_items().remove_many(&resolved_ids)?;

        let confirmed: HashSet<&str> = accepted
            .iter()
            .map(|i| i.purchase_id.as_str())
            .filter(|p| !rejected_purchases.contains(*p))
            .collect();
        for purchase_id in confirmed {
            if self.queue.rejections().remove(purchase_id)? {
                info!(event_id = %event_id, purchase_id, "resubmitted purchase accepted");
            }
        }

        let missing: Vec<&str> = batch
            .iter()
            .map(|i| i.item_id.as_str())
            .filter(|id| !resolved.contains(id))
            .collect();
        if !missing.is_empty() {
            self.queue
                .pending_items()
                .annotate_many(&missing, "no verdict received; will retry")?;
            report.missing_verdicts += missing.len();
            warn!(
                event_id = %event_id,
                items = missing.len(),
                "response carried no verdict for some items, left pending"
            );
        }
        Ok(())
    }

    fn drain_scans(
        &self,
        report: &mut SyncReport,
        failure: &mut Option<SyncError>,
    ) -> SyncResult<()> {
        self.set_state(SyncState::Draining);
        let pending = self.queue.pending_scans().list_pending()?;

        for scan in pending {
            self.check_cancelled()?;

            if self.suppress_duplicate(&scan)? {
                report.duplicates_suppressed += 1;
                continue;
            }

            self.set_state(SyncState::Submitting);
            let request = SubmitScanRequest {
                event_id: scan.event_id.as_str().to_string(),
                ticket_id: scan.ticket_id.clone(),
                scanned_at: scan.scanned_at,
            };
            let verdict = match self.transport.submit_scan(&request) {
                Ok(verdict) => verdict,
                Err(e) => {
                    self.queue
                        .pending_scans()
                        .update_error_text(&scan.scan_id, Some(retry_hint(&e)))?;
                    if e.is_transient() {
                        self.note_transient(report, &e, 1);
                        return Ok(());
                    }
                    self.note_failure(report, failure, e, 1);
                    self.set_state(SyncState::Draining);
                    continue;
                }
            };

            self.set_state(SyncState::Applying);
            let entry = match verdict {
                ScanVerdict::Accepted { ticket } => {
                    report.scans_committed += 1;
                    let mut entry = wire::outcome(&scan, ScanStatus::Success, false, now_millis());
                    entry.ticket_type = ticket.ticket_type;
                    entry.email = ticket.email;
                    entry
                }
                ScanVerdict::Rejected { reason, message } => {
                    report.scans_rejected += 1;
                    let status = wire::scan_status_from_wire(reason);
                    let mut entry = wire::outcome(&scan, status, false, now_millis());
                    entry.error_message = (!message.is_empty()).then_some(message);
                    debug!(ticket_id = %scan.ticket_id, %status, "scan refused");
                    entry
                }
            };
            self.queue.ledger().record(&entry)?;
            self.queue.pending_scans().remove(&scan.scan_id)?;
            self.set_state(SyncState::Draining);
        }
        Ok(())
    }

    /// Resolves a pending scan locally if another scan already admitted its
    /// ticket.
    fn suppress_duplicate(&self, scan: &PendingScan) -> SyncResult<bool> {
        let ledger = self.queue.ledger();
        let commit = match ledger.find_committed(&scan.event_id, &scan.ticket_id)? {
            Some(commit) if commit.scan_id != scan.scan_id => commit,
            _ => return Ok(false),
        };

        let mut entry = wire::outcome(scan, ScanStatus::Duplicate, true, now_millis());
        entry.error_message = Some(format!("already admitted by scan {}", commit.scan_id));
        ledger.record(&entry)?;
        self.queue.pending_scans().remove(&scan.scan_id)?;
        debug!(
            ticket_id = %scan.ticket_id,
            first_scan = %commit.scan_id,
            "duplicate scan resolved locally"
        );
        Ok(true)
    }

    fn note_transient(&self, report: &mut SyncReport, error: &SyncError, entries: usize) {
        report.transient_error = Some(error.to_string());
        self.stats.write().transient_failures += 1;
        warn!(
            event_id = %self.queue.event_id(),
            entries,
            error = %error,
            "transient failure, entries left pending"
        );
    }

    fn note_failure(
        &self,
        report: &mut SyncReport,
        failure: &mut Option<SyncError>,
        error: SyncError,
        entries: usize,
    ) {
        report.entries_failed += entries;
        warn!(
            event_id = %self.queue.event_id(),
            entries,
            error = %error,
            "upload refused, entries left pending"
        );
        failure.get_or_insert(error);
    }

    /// Pages through the service's sold items and marks the local copies
    /// uploaded.
    ///
    /// Items the service already holds leave the pending journal; items sold
    /// elsewhere are added to the local store. Returns the number of records
    /// written.
    pub fn refresh_sold_items(&self) -> SyncResult<usize> {
        let event_id = self.queue.event_id();
        let store = self.queue.sold_items();
        let local: HashMap<String, StoredSoldItem> = store
            .list_pending()?
            .into_iter()
            .map(|i| (i.item_id.clone(), i))
            .collect();

        let mut seen_tokens = HashSet::new();
        let mut page_token = None;
        let mut written = 0;
        loop {
            let page = self.transport.list_sold_items(&ListSoldItemsRequest {
                event_id: event_id.as_str().to_string(),
                purchase_id: None,
                page_size: self.config.refresh_page_size,
                page_token: page_token.take(),
            })?;

            let updates: Vec<StoredSoldItem> = page
                .items
                .iter()
                .filter_map(|item| match local.get(&item.item_id) {
                    Some(existing) if existing.uploaded => None,
                    Some(existing) => Some(StoredSoldItem {
                        uploaded: true,
                        ..existing.clone()
                    }),
                    None => Some(wire::item_from_wire(event_id, item)),
                })
                .collect();
            if !updates.is_empty() {
                written += store.upsert_many(&updates)?;
            }

            let known: Vec<&str> = page.items.iter().map(|i| i.item_id.as_str()).collect();
            let removed = self.queue.pending_items().remove_many(&known)?;
            if removed > 0 {
                debug!(event_id = %event_id, removed, "pending items already known upstream");
            }

            match page.next_page_token {
                Some(next) if seen_tokens.insert(next.clone()) => page_token = Some(next),
                Some(next) => {
                    warn!(event_id = %event_id, token = %next, "page token repeated, stopping");
                    break;
                }
                None => break,
            }
        }

        info!(event_id = %event_id, written, "sold items refreshed");
        Ok(written)
    }

    /// Looks up a ticket with the service.
    pub fn lookup_ticket(&self, ticket_id: &str) -> SyncResult<TicketRecord> {
        self.transport.get_ticket(&GetTicketRequest {
            event_id: self.queue.event_id().as_str().to_string(),
            ticket_id: ticket_id.to_string(),
        })
    }

    /// Handles an error by updating state and stats.
    fn handle_error(&self, error: &SyncError) {
        self.set_state(SyncState::Idle);
        self.stats.write().last_error = Some(error.to_string());
        warn!(event_id = %self.queue.event_id(), error = %error, "sync cycle failed");
    }
}

fn retry_hint(error: &SyncError) -> String {
    format!("{error}; will retry")
}

/// Groups items by purchase in first-seen order and packs whole purchases
/// into batches of at most `cap` items. A purchase larger than `cap` is sent
/// alone.
pub(crate) fn batch_by_purchase(items: Vec<PendingItem>, cap: usize) -> Vec<Vec<PendingItem>> {
    let mut order: Vec<Vec<PendingItem>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for item in items {
        match index.get(&item.purchase_id) {
            Some(&i) => order[i].push(item),
            None => {
                index.insert(item.purchase_id.clone(), order.len());
                order.push(vec![item]);
            }
        }
    }

    let mut batches = Vec::new();
    let mut current: Vec<PendingItem> = Vec::new();
    for group in order {
        if !current.is_empty() && current.len() + group.len() > cap {
            batches.push(std::mem::take(&mut current));
        }
        current.extend(group);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use boxoffice_core::{EventId, NewSale, PaymentMethod};

    fn item(id: &str, purchase: &str) -> PendingItem {
        PendingItem {
            item_id: id.into(),
            purchase_id: purchase.into(),
            seller_id: 1,
            price: 100,
            payment_method: PaymentMethod::Cash,
            error_text: None,
            timestamp: 0,
        }
    }

    fn ids(batch: &[PendingItem]) -> Vec<&str> {
        batch.iter().map(|i| i.item_id.as_str()).collect()
    }

    fn engine() -> SyncEngine<MockTransport> {
        let queue = Arc::new(EventQueue::in_memory(EventId::new("ev").unwrap()));
        SyncEngine::new(SyncConfig::new(), MockTransport::new(), queue)
    }

    #[test]
    fn sync_state_checks() {
        assert!(SyncState::Idle.can_start_sync());
        assert!(!SyncState::Draining.can_start_sync());
        assert!(!SyncState::Applying.can_start_sync());

        assert!(SyncState::Submitting.is_active());
        assert!(!SyncState::Idle.is_active());
    }

    #[test]
    fn purchases_never_split() {
        let items = vec![
            item("a1", "A"),
            item("b1", "B"),
            item("a2", "A"),
            item("c1", "C"),
            item("b2", "B"),
        ];
        let batches = batch_by_purchase(items, 3);

        assert_eq!(batches.len(), 2);
        assert_eq!(ids(&batches[0]), vec!["a1", "a2"]);
        assert_eq!(ids(&batches[1]), vec!["b1", "b2", "c1"]);
    }

    #[test]
    fn purchase_filling_batch_exactly_joins_it() {
        let items = vec![
            item("a1", "A"),
            item("b1", "B"),
            item("b2", "B"),
            item("c1", "C"),
        ];
        let batches = batch_by_purchase(items, 3);

        assert_eq!(batches.len(), 2);
        assert_eq!(ids(&batches[0]), vec!["a1", "b1", "b2"]);
        assert_eq!(ids(&batches[1]), vec!["c1"]);
    }

    #[test]
    fn oversized_purchase_sent_alone() {
        let items = vec![item("x", "X"), item("a1", "A"), item("a2", "A"), item("a3", "A")];
        let batches = batch_by_purchase(items, 2);

        assert_eq!(batches.len(), 2);
        assert_eq!(ids(&batches[0]), vec!["x"]);
        assert_eq!(ids(&batches[1]), vec!["a1", "a2", "a3"]);
    }

    #[test]
    fn sync_engine_initial_state() {
        let engine = engine();
        assert_eq!(engine.state(), SyncState::Idle);
        assert_eq!(engine.stats().cycles_completed, 0);
    }

    #[test]
    fn empty_queue_syncs_without_requests() {
        let engine = engine();
        let report = engine.sync().unwrap();

        assert_eq!(report.items_accepted, 0);
        assert!(!report.is_partial());
        assert_eq!(engine.transport().calls().submit_purchases, 0);
        assert_eq!(engine.state(), SyncState::Idle);
        assert_eq!(engine.stats().cycles_completed, 1);
    }

    #[test]
    fn accepted_items_leave_pending() {
        let engine = engine();
        engine
            .queue()
            .record_purchase(&[NewSale::new(3, 500, PaymentMethod::Cash)])
            .unwrap();

        let report = engine.sync().unwrap();
        assert_eq!(report.items_accepted, 1);
        assert_eq!(engine.pending_counts().unwrap().unsynced(), 0);
        assert!(engine.queue().sold_items().list_pending().unwrap()[0].uploaded);
    }

    #[test]
    fn fatal_error_keeps_entries_and_returns_to_idle() {
        let engine = engine();
        engine
            .queue()
            .record_purchase(&[NewSale::new(3, 500, PaymentMethod::Cash)])
            .unwrap();
        engine
            .transport()
            .push_purchase_reply(Err(SyncError::server(400, "malformed batch")));

        let err = engine.sync().unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(engine.state(), SyncState::Idle);
        assert!(engine.stats().last_error.is_some());

        let pending = engine.queue().pending_items().list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].error_text.as_deref().unwrap().contains("malformed batch"));
    }

    #[test]
    fn sync_engine_cancel() {
        let engine = engine();

        assert!(!engine.cancelled.load(Ordering::SeqCst));
        engine.cancel();
        assert!(engine.cancelled.load(Ordering::SeqCst));
        engine.reset_cancel();
        assert!(!engine.cancelled.load(Ordering::SeqCst));
    }
}
