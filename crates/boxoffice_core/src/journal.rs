//! Durable journal of unresolved records.
//!
//! A journal is the newline-separated concatenation of its records' JSON
//! lines. Presence of a line means the record is unresolved; resolving a
//! record physically removes its line.
//!
//! ## Durability
//!
//! Every mutation goes through the backend's atomic `append` / `replace`,
//! so a crash leaves either the old or the new set of lines. Lines that fail
//! to decode (for example a torn line written by an older, non-atomic build)
//! are skipped on load and dropped on the next rewrite.
//!
//! ## Concurrency
//!
//! All operations on one journal are serialized by an internal mutex, which
//! makes the journal the single writer of its backend.

use crate::error::{CoreError, CoreResult};
use crate::record::{decode_lines, encode_line, JournalRecord, MalformedLine, Retryable};
use crate::types::EventId;
use boxoffice_storage::StorageBackend;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::marker::PhantomData;

/// Line-level health of a journal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalHealth {
    /// Number of well-formed records.
    pub records: usize,
    /// Lines that failed to decode.
    pub malformed: Vec<MalformedLine>,
}

impl JournalHealth {
    /// Returns true if no malformed lines were found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.malformed.is_empty()
    }
}

/// A durable, append-oriented store of records of one kind for one event.
pub struct Journal<R: JournalRecord> {
    event_id: EventId,
    backend: Mutex<Box<dyn StorageBackend>>,
    _marker: PhantomData<fn() -> R>,
}

impl<R: JournalRecord> Journal<R> {
    /// Opens a journal over a storage backend.
    pub fn open(event_id: EventId, backend: Box<dyn StorageBackend>) -> Self {
        Self {
            event_id,
            backend: Mutex::new(backend),
            _marker: PhantomData,
        }
    }

    /// Returns the event this journal is scoped to.
    #[must_use]
    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    /// Appends a record.
    pub fn append(&self, record: &R) -> CoreResult<()> {
        self.append_all(std::slice::from_ref(record))
    }

    /// Appends several records in a single atomic write.
    pub fn append_all(&self, records: &[R]) -> CoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut lines = Vec::new();
        for record in records {
            lines.extend(encode_line(record)?);
        }

        let mut backend = self.backend.lock();
        let current = backend.read_all()?;
        if !current.is_empty() && current.last() != Some(&b'\n') {
            // Terminate a torn trailing line so the new record stays intact
            lines.insert(0, b'\n');
        }
        backend.append(&lines)?;
        Ok(())
    }

    /// Appends a record unless one with the same id is already present.
    ///
    /// Returns true if the record was appended.
    pub fn append_if_absent(&self, record: &R) -> CoreResult<bool> {
        let appended = self.append_missing(std::slice::from_ref(record))?;
        Ok(appended == 1)
    }

    /// Appends, in one atomic write, every record whose id is not present yet.
    ///
    /// Returns the number of records appended.
    pub fn append_missing(&self, records: &[R]) -> CoreResult<usize> {
        let mut backend = self.backend.lock();
        let current = backend.read_all()?;
        let existing: HashSet<String> = decode_lines::<R>(&current)
            .records
            .iter()
            .map(|r| r.record_id().into_owned())
            .collect();

        let mut seen = HashSet::new();
        let mut lines = Vec::new();
        let mut appended = 0;
        for record in records {
            let id = record.record_id().into_owned();
            if existing.contains(&id) || !seen.insert(id) {
                continue;
            }
            lines.extend(encode_line(record)?);
            appended += 1;
        }

        if appended > 0 {
            if !current.is_empty() && current.last() != Some(&b'\n') {
                lines.insert(0, b'\n');
            }
            backend.append(&lines)?;
        }
        Ok(appended)
    }

    /// Returns every unresolved record in file order.
    pub fn list_pending(&self) -> CoreResult<Vec<R>> {
        let data = self.backend.lock().read_all()?;
        let decoded = decode_lines::<R>(&data);
        self.report_malformed(&decoded.malformed);
        Ok(decoded.records)
    }

    /// Returns the record with the given id.
    pub fn get(&self, id: &str) -> CoreResult<Option<R>> {
        Ok(self
            .list_pending()?
            .into_iter()
            .find(|r| r.record_id() == id))
    }

    /// Returns true if a record with the given id is present.
    pub fn contains(&self, id: &str) -> CoreResult<bool> {
        Ok(self.get(id)?.is_some())
    }

    /// Returns the number of unresolved records.
    pub fn len(&self) -> CoreResult<usize> {
        Ok(self.list_pending()?.len())
    }

    /// Returns true if no records are unresolved.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Removes the record with the given id.
    ///
    /// Removing an absent id is a no-op. Returns true if a record was removed.
    pub fn remove(&self, id: &str) -> CoreResult<bool> {
        Ok(self.remove_many(&[id])? > 0)
    }

    /// Removes every record whose id is listed, in one rewrite.
    ///
    /// Returns the number of records removed.
    pub fn remove_many(&self, ids: &[&str]) -> CoreResult<usize> {
        let ids: HashSet<&str> = ids.iter().copied().collect();
        self.rewrite(|records| {
            let before = records.len();
            records.retain(|r| !ids.contains(r.record_id().as_ref()));
            before - records.len()
        })
    }

    /// Applies `f` to the record with the given id and persists the result.
    ///
    /// Returns false if no such record exists.
    pub fn update<F>(&self, id: &str, f: F) -> CoreResult<bool>
    where
        F: FnOnce(&mut R),
    {
        self.rewrite(|records| match records.iter_mut().find(|r| r.record_id() == id) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        })
    }

    /// Replaces the record with the same id, or appends it if absent.
    pub fn upsert(&self, record: &R) -> CoreResult<()> {
        let id = record.record_id().into_owned();
        let replaced = self.update(&id, |existing| *existing = record.clone())?;
        if !replaced {
            self.append(record)?;
        }
        Ok(())
    }

    /// Replaces or appends several records in one rewrite.
    ///
    /// Returns the number of records written.
    pub fn upsert_many(&self, updates: &[R]) -> CoreResult<usize> {
        self.rewrite(|records| {
            for update in updates {
                let id = update.record_id();
                match records.iter_mut().find(|r| r.record_id() == id) {
                    Some(existing) => *existing = update.clone(),
                    None => records.push(update.clone()),
                }
            }
            updates.len()
        })
    }

    /// Reports well-formed and malformed line counts.
    pub fn verify(&self) -> CoreResult<JournalHealth> {
        let data = self.backend.lock().read_all()?;
        let decoded = decode_lines::<R>(&data);
        Ok(JournalHealth {
            records: decoded.records.len(),
            malformed: decoded.malformed,
        })
    }

    /// Loads, edits and atomically rewrites the journal.
    ///
    /// Nothing is written when `edit` reports no change.
    fn rewrite<T, F>(&self, edit: F) -> CoreResult<T>
    where
        T: Changed,
        F: FnOnce(&mut Vec<R>) -> T,
    {
        let mut backend = self.backend.lock();
        let data = backend.read_all()?;
        let decoded = decode_lines::<R>(&data);
        let mut records = decoded.records;

        let outcome = edit(&mut records);
        if !outcome.changed() {
            return Ok(outcome);
        }

        if !decoded.malformed.is_empty() {
            tracing::warn!(
                event_id = %self.event_id,
                kind = %R::KIND,
                dropped = decoded.malformed.len(),
                "dropping malformed journal lines during rewrite"
            );
        }

        let mut content = Vec::with_capacity(data.len());
        for record in &records {
            content.extend(encode_line(record)?);
        }
        backend.replace(&content)?;
        Ok(outcome)
    }

    fn report_malformed(&self, malformed: &[MalformedLine]) {
        for line in malformed {
            tracing::warn!(
                event_id = %self.event_id,
                kind = %R::KIND,
                line = line.line_number,
                error = %line.error,
                "skipping malformed journal line"
            );
        }
    }
}

impl<R: Retryable> Journal<R> {
    /// Sets or clears the retry annotation of a record without resolving it.
    pub fn update_error_text(&self, id: &str, text: Option<String>) -> CoreResult<bool> {
        self.update(id, |record| record.set_error_text(text))
    }

    /// Sets the same retry annotation on several records in one rewrite.
    pub fn annotate_many(&self, ids: &[&str], text: &str) -> CoreResult<usize> {
        let ids: HashSet<&str> = ids.iter().copied().collect();
        self.rewrite(|records| {
            let mut touched = 0;
            for record in records.iter_mut() {
                if ids.contains(record.record_id().as_ref()) {
                    record.set_error_text(Some(text.to_string()));
                    touched += 1;
                }
            }
            touched
        })
    }
}

impl<R: JournalRecord> Journal<R> {
    /// Returns the record with the given id or a not-found error.
    pub fn require(&self, id: &str) -> CoreResult<R> {
        self.get(id)?
            .ok_or_else(|| CoreError::record_not_found(R::KIND.name(), id))
    }
}

impl<R: JournalRecord> std::fmt::Debug for Journal<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("event_id", &self.event_id)
            .field("kind", &R::KIND)
            .finish()
    }
}

/// Tells [`Journal::rewrite`] whether an edit changed anything.
trait Changed {
    fn changed(&self) -> bool;
}

impl Changed for bool {
    fn changed(&self) -> bool {
        *self
    }
}

impl Changed for usize {
    fn changed(&self) -> bool {
        *self > 0
    }
}
