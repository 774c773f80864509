//! Commit ledger for scan duplicate suppression.
//!
//! The ledger is an append-only history of scan outcomes. A ticket counts as
//! committed once an admitting outcome (`SUCCESS` or `OFFLINE_SUCCESS`) has
//! been recorded for it; any later scan of the same ticket at the same event
//! is a duplicate, whether or not the remote service is reachable.
//!
//! An admission lasts until the same scan is refused (`INVALID` or `ERROR`).
//! Only the latest outcome of each scan counts.

use crate::error::CoreResult;
use crate::journal::Journal;
use crate::types::{CommittedScan, EventId};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Durable, append-only store of scan outcomes for one event.
#[derive(Debug)]
pub struct CommitLedger {
    journal: Journal<CommittedScan>,
    // ticket_id -> scan_id of the first standing admission
    committed: RwLock<Option<HashMap<String, String>>>,
}

impl CommitLedger {
    /// Wraps a journal of committed scans.
    pub fn new(journal: Journal<CommittedScan>) -> Self {
        Self {
            journal,
            committed: RwLock::new(None),
        }
    }

    /// Returns the event this ledger is scoped to.
    #[must_use]
    pub fn event_id(&self) -> &EventId {
        self.journal.event_id()
    }

    /// Returns true if `ticket_id` has been admitted at `event_id`.
    pub fn has_committed(&self, event_id: &EventId, ticket_id: &str) -> CoreResult<bool> {
        Ok(self.committing_scan_id(event_id, ticket_id)?.is_some())
    }

    /// Returns the first admitting outcome of the scan that holds a ticket.
    pub fn find_committed(
        &self,
        event_id: &EventId,
        ticket_id: &str,
    ) -> CoreResult<Option<CommittedScan>> {
        let scan_id = match self.committing_scan_id(event_id, ticket_id)? {
            Some(scan_id) => scan_id,
            None => return Ok(None),
        };
        Ok(self
            .journal
            .list_pending()?
            .into_iter()
            .find(|scan| scan.status.is_commit() && scan.scan_id == scan_id))
    }

    /// Appends an outcome to the ledger.
    pub fn record(&self, scan: &CommittedScan) -> CoreResult<()> {
        self.ensure_index()?;
        self.journal.append(scan)?;

        if scan.event_id != *self.journal.event_id() {
            return Ok(());
        }
        let mut slot = self.committed.write();
        let holder = slot
            .as_ref()
            .and_then(|index| index.get(&scan.ticket_id))
            .cloned();
        if scan.status.is_commit() {
            if let Some(index) = slot.as_mut() {
                index
                    .entry(scan.ticket_id.clone())
                    .or_insert_with(|| scan.scan_id.clone());
            }
        } else if scan.status.is_refusal() && holder.as_deref() == Some(scan.scan_id.as_str()) {
            // Another scan of the ticket may still stand; rebuild from disk.
            *slot = None;
            tracing::debug!(
                ticket_id = %scan.ticket_id,
                scan_id = %scan.scan_id,
                "admission withdrawn"
            );
        }
        Ok(())
    }

    /// Returns every recorded outcome in recording order.
    pub fn history(&self) -> CoreResult<Vec<CommittedScan>> {
        self.journal.list_pending()
    }

    /// Returns the underlying journal.
    #[must_use]
    pub fn journal(&self) -> &Journal<CommittedScan> {
        &self.journal
    }

    /// Forgets the in-memory index so the next lookup reloads from disk.
    pub fn invalidate(&self) {
        *self.committed.write() = None;
    }

    fn committing_scan_id(&self, event_id: &EventId, ticket_id: &str) -> CoreResult<Option<String>> {
        if event_id != self.journal.event_id() {
            return Ok(None);
        }
        self.ensure_index()?;
        Ok(self
            .committed
            .read()
            .as_ref()
            .and_then(|index| index.get(ticket_id).cloned()))
    }

    fn ensure_index(&self) -> CoreResult<()> {
        if self.committed.read().is_some() {
            return Ok(());
        }

        // Load without holding the index lock across disk I/O
        let history: Vec<CommittedScan> = self
            .journal
            .list_pending()?
            .into_iter()
            .filter(|scan| scan.event_id == *self.journal.event_id())
            .collect();
        let latest: HashMap<&str, bool> = history
            .iter()
            .map(|scan| (scan.scan_id.as_str(), scan.status.is_refusal()))
            .collect();

        let mut index = HashMap::new();
        for scan in &history {
            let refused = latest.get(scan.scan_id.as_str()).copied().unwrap_or(false);
            if scan.status.is_commit() && !refused {
                index
                    .entry(scan.ticket_id.clone())
                    .or_insert_with(|| scan.scan_id.clone());
            }
        }

        let mut slot = self.committed.write();
        if slot.is_none() {
            *slot = Some(index);
        }
        Ok(())
    }
}
