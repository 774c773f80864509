//! The per-event offline queue.
//!
//! An [`EventQueue`] bundles the journals of one event: pending items and
//! scans, the commit ledger, rejected purchases and sold items. Callers record
//! sales and scans here synchronously; the sync engine drains the same queue.

use crate::config::QueueConfig;
use crate::dir::DataDir;
use crate::error::{CoreError, CoreResult};
use crate::id::IdGenerator;
use crate::journal::{Journal, JournalHealth};
use crate::ledger::CommitLedger;
use crate::record::{JournalRecord, RecordKind};
use crate::recovery::{RecoveryManager, RecoveryResult};
use crate::rejection::{RejectedPurchase, RejectionStore};
use crate::types::{
    now_millis, CommittedScan, EventId, PaymentMethod, PendingItem, PendingScan, ScanStatus,
    StoredSoldItem,
};
use boxoffice_storage::{InMemoryBackend, StorageBackend};
use parking_lot::Mutex;

/// One line of a sale, before ids are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewSale {
    /// Seller number.
    pub seller_id: i64,
    /// Price in minor currency units.
    pub price: i64,
    /// Payment method.
    pub payment_method: PaymentMethod,
}

impl NewSale {
    /// Creates a sale line.
    #[must_use]
    pub fn new(seller_id: i64, price: i64, payment_method: PaymentMethod) -> Self {
        Self {
            seller_id,
            price,
            payment_method,
        }
    }
}

/// A purchase recorded in the pending journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPurchase {
    /// Id shared by every item.
    pub purchase_id: String,
    /// The pending items, in sale order.
    pub items: Vec<PendingItem>,
}

/// Local verdict for a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Admitted offline and queued for upload.
    Accepted(PendingScan),
    /// The ticket was already admitted; nothing is queued.
    Duplicate(CommittedScan),
}

/// Unsynced work of one event, as shown to the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    /// Sold items waiting for upload.
    pub items: usize,
    /// Scans waiting for upload.
    pub scans: usize,
    /// Rejected purchases still stored.
    pub rejected_purchases: usize,
    /// Rejected purchases waiting for an operator.
    pub needs_review: usize,
}

impl PendingCounts {
    /// Returns the number of entries not yet synced.
    #[must_use]
    pub fn unsynced(&self) -> usize {
        self.items + self.scans
    }
}

/// Storage backends of one event queue.
pub struct QueueBackends {
    /// Backend of the pending item journal.
    pub pending_items: Box<dyn StorageBackend>,
    /// Backend of the pending scan journal.
    pub pending_scans: Box<dyn StorageBackend>,
    /// Backend of the commit ledger.
    pub committed_scans: Box<dyn StorageBackend>,
    /// Backend of the rejected purchase store.
    pub rejected_purchases: Box<dyn StorageBackend>,
    /// Backend of the sold item store.
    pub sold_items: Box<dyn StorageBackend>,
}

impl QueueBackends {
    /// Creates fresh in-memory backends.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            pending_items: Box::new(InMemoryBackend::new()),
            pending_scans: Box::new(InMemoryBackend::new()),
            committed_scans: Box::new(InMemoryBackend::new()),
            rejected_purchases: Box::new(InMemoryBackend::new()),
            sold_items: Box::new(InMemoryBackend::new()),
        }
    }

    /// Opens the file backends of an event in a data directory.
    pub fn open(dir: &DataDir, event_id: &EventId) -> CoreResult<Self> {
        Ok(Self {
            pending_items: Box::new(dir.open_backend(event_id, RecordKind::PendingItems)?),
            pending_scans: Box::new(dir.open_backend(event_id, RecordKind::PendingScans)?),
            committed_scans: Box::new(dir.open_backend(event_id, RecordKind::CommittedScans)?),
            rejected_purchases: Box::new(
                dir.open_backend(event_id, RecordKind::RejectedPurchases)?,
            ),
            sold_items: Box::new(dir.open_backend(event_id, RecordKind::SoldItems)?),
        })
    }
}

impl std::fmt::Debug for QueueBackends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueBackends").finish_non_exhaustive()
    }
}

/// The offline queue of one event.
#[derive(Debug)]
pub struct EventQueue {
    event_id: EventId,
    pending_items: Journal<PendingItem>,
    pending_scans: Journal<PendingScan>,
    ledger: CommitLedger,
    rejections: RejectionStore,
    sold_items: Journal<StoredSoldItem>,
    recovery: RecoveryManager,
    ids: IdGenerator,
    // held across the duplicate check and the admission
    scan_lock: Mutex<()>,
}

impl EventQueue {
    /// Opens the file-backed queue of an event.
    pub fn open(dir: &DataDir, event_id: EventId, config: &QueueConfig) -> CoreResult<Self> {
        let backends = QueueBackends::open(dir, &event_id)?;
        Ok(Self::with_backends(event_id, backends, config))
    }

    /// Creates a queue that keeps everything in memory.
    #[must_use]
    pub fn in_memory(event_id: EventId) -> Self {
        Self::with_backends(event_id, QueueBackends::in_memory(), &QueueConfig::default())
    }

    /// Creates a queue over explicit backends.
    #[must_use]
    pub fn with_backends(event_id: EventId, backends: QueueBackends, config: &QueueConfig) -> Self {
        Self {
            pending_items: Journal::open(event_id.clone(), backends.pending_items),
            pending_scans: Journal::open(event_id.clone(), backends.pending_scans),
            ledger: CommitLedger::new(Journal::open(event_id.clone(), backends.committed_scans)),
            rejections: RejectionStore::new(Journal::open(
                event_id.clone(),
                backends.rejected_purchases,
            )),
            sold_items: Journal::open(event_id.clone(), backends.sold_items),
            recovery: RecoveryManager::new(config.max_auto_recovery_attempts),
            ids: IdGenerator::new(),
            scan_lock: Mutex::new(()),
            event_id,
        }
    }

    /// Replaces the identifier generator.
    #[must_use]
    pub fn with_id_generator(mut self, ids: IdGenerator) -> Self {
        self.ids = ids;
        self
    }

    /// Returns the event this queue is scoped to.
    #[must_use]
    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    /// Records a purchase.
    ///
    /// Every item is written to the pending journal in one atomic append, so
    /// a purchase is never partially queued.
    pub fn record_purchase(&self, sales: &[NewSale]) -> CoreResult<RecordedPurchase> {
        if sales.is_empty() {
            return Err(CoreError::invalid_operation("a purchase needs at least one item"));
        }

        let purchase_id = self.ids.next_string();
        let timestamp = now_millis();
        let items: Vec<PendingItem> = sales
            .iter()
            .map(|sale| PendingItem {
                item_id: self.ids.next_string(),
                purchase_id: purchase_id.clone(),
                seller_id: sale.seller_id,
                price: sale.price,
                payment_method: sale.payment_method,
                error_text: None,
                timestamp,
            })
            .collect();

        self.pending_items.append_all(&items)?;
        let stored: Vec<StoredSoldItem> = items
            .iter()
            .map(|item| StoredSoldItem::from_pending(&self.event_id, item, false))
            .collect();
        self.sold_items.append_missing(&stored)?;

        tracing::debug!(
            event_id = %self.event_id,
            purchase_id = %purchase_id,
            items = items.len(),
            "recorded purchase"
        );
        Ok(RecordedPurchase { purchase_id, items })
    }

    /// Records a scan, deciding locally whether the ticket was already used.
    ///
    /// No network is involved: a ticket already admitted at this event is a
    /// duplicate; anything else is admitted offline and queued for upload.
    /// Concurrent scans of one queue are serialized, so a ticket is admitted
    /// at most once.
    pub fn record_scan(&self, ticket_id: &str) -> CoreResult<ScanOutcome> {
        let _guard = self.scan_lock.lock();
        let scan_id = self.ids.next_string();
        let now = now_millis();

        if self.ledger.has_committed(&self.event_id, ticket_id)? {
            let outcome = CommittedScan {
                scan_id,
                ticket_id: ticket_id.to_string(),
                event_id: self.event_id.clone(),
                scanned_at: now,
                committed_at: now,
                was_offline: true,
                status: ScanStatus::Duplicate,
                ticket_type: None,
                email: None,
                error_message: Some("ticket already scanned".into()),
            };
            self.ledger.record(&outcome)?;
            tracing::info!(event_id = %self.event_id, ticket_id, "duplicate scan rejected locally");
            return Ok(ScanOutcome::Duplicate(outcome));
        }

        let scan = PendingScan {
            scan_id: scan_id.clone(),
            ticket_id: ticket_id.to_string(),
            event_id: self.event_id.clone(),
            scanned_at: now,
            error_text: None,
        };
        self.pending_scans.append(&scan)?;
        self.ledger.record(&CommittedScan {
            scan_id,
            ticket_id: ticket_id.to_string(),
            event_id: self.event_id.clone(),
            scanned_at: now,
            committed_at: now,
            was_offline: true,
            status: ScanStatus::OfflineSuccess,
            ticket_type: None,
            email: None,
            error_message: None,
        })?;
        Ok(ScanOutcome::Accepted(scan))
    }

    /// Returns the aggregate counts shown to the user.
    pub fn pending_counts(&self) -> CoreResult<PendingCounts> {
        let rejected = self.rejections.list()?;
        Ok(PendingCounts {
            items: self.pending_items.len()?,
            scans: self.pending_scans.len()?,
            needs_review: rejected.iter().filter(|p| p.needs_manual_review).count(),
            rejected_purchases: rejected.len(),
        })
    }

    /// Reports the line health of every journal.
    pub fn verify(&self) -> CoreResult<Vec<(RecordKind, JournalHealth)>> {
        Ok(vec![
            health(&self.pending_items)?,
            health(&self.pending_scans)?,
            health(self.ledger.journal())?,
            health(self.rejections.journal())?,
            health(&self.sold_items)?,
        ])
    }

    /// Returns the pending item journal.
    #[must_use]
    pub fn pending_items(&self) -> &Journal<PendingItem> {
        &self.pending_items
    }

    /// Returns the pending scan journal.
    #[must_use]
    pub fn pending_scans(&self) -> &Journal<PendingScan> {
        &self.pending_scans
    }

    /// Returns the commit ledger.
    #[must_use]
    pub fn ledger(&self) -> &CommitLedger {
        &self.ledger
    }

    /// Returns the rejected purchase store.
    #[must_use]
    pub fn rejections(&self) -> &RejectionStore {
        &self.rejections
    }

    /// Returns the sold item store.
    #[must_use]
    pub fn sold_items(&self) -> &Journal<StoredSoldItem> {
        &self.sold_items
    }

    /// Returns the recovery manager.
    #[must_use]
    pub fn recovery(&self) -> &RecoveryManager {
        &self.recovery
    }

    /// Returns the identifier generator.
    #[must_use]
    pub fn ids(&self) -> &IdGenerator {
        &self.ids
    }

    /// Runs automatic recovery on a stored purchase.
    pub fn recover(&self, purchase: RejectedPurchase) -> CoreResult<RecoveryResult> {
        self.recovery.recover(&self.rejections, purchase)
    }

    /// Puts a rejected purchase back into the pending journal.
    pub fn resubmit(&self, purchase_id: &str) -> CoreResult<usize> {
        self.recovery
            .resubmit(&self.rejections, &self.pending_items, purchase_id)
    }

    /// Re-enters every purchase eligible for another automatic attempt.
    pub fn resubmit_eligible(&self) -> CoreResult<Vec<String>> {
        self.recovery
            .resubmit_eligible(&self.rejections, &self.pending_items)
    }

    /// Corrects the seller of a rejected item.
    pub fn correct_seller(
        &self,
        purchase_id: &str,
        item_id: &str,
        seller: i64,
    ) -> CoreResult<RejectedPurchase> {
        self.recovery
            .correct_seller(&self.rejections, purchase_id, item_id, seller)
    }

    /// Removes an item from a rejected purchase.
    pub fn drop_item(
        &self,
        purchase_id: &str,
        item_id: &str,
    ) -> CoreResult<Option<RejectedPurchase>> {
        self.recovery
            .drop_item(&self.rejections, purchase_id, item_id)
    }

    /// Discards a rejected purchase.
    pub fn discard(&self, purchase_id: &str) -> CoreResult<bool> {
        self.recovery.discard(&self.rejections, purchase_id)
    }

    /// Returns the purchases waiting for an operator.
    pub fn review_queue(&self) -> CoreResult<Vec<RejectedPurchase>> {
        self.recovery.review_queue(&self.rejections)
    }
}

fn health<R: JournalRecord>(journal: &Journal<R>) -> CoreResult<(RecordKind, JournalHealth)> {
    Ok((R::KIND, journal.verify()?))
}
