//! One-time migration from the legacy layout.
//!
//! Older installations kept a single file per record kind under `legacy/`,
//! with every line carrying the `event_id` it belongs to. The migration moves
//! each line into the journal of its event.
//!
//! ## Guarantees
//!
//! - **Idempotent**: entries already present in the target journal are
//!   skipped, so re-running after a crash never duplicates anything
//! - **Per-entry failures are not fatal**: a line that cannot be moved is
//!   logged and kept in the legacy file for a later `run(true)`
//! - **One-shot**: the `MIGRATED` flag is written only after a pass that
//!   finished without a fatal error; once set, `run_if_needed` is a no-op

use crate::dir::DataDir;
use crate::error::{CoreError, CoreResult};
use crate::record::{JournalRecord, RecordKind};
use crate::types::{CommittedScan, EventId, PendingItem, PendingScan};
use boxoffice_storage::{FileBackend, StorageBackend};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;

/// Record kinds that existed in the legacy layout.
pub const LEGACY_KINDS: [RecordKind; 3] = [
    RecordKind::PendingItems,
    RecordKind::PendingScans,
    RecordKind::CommittedScans,
];

/// Result of a migration pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// True if the pass was skipped because the flag was already set.
    pub skipped: bool,
    /// Entries appended to a per-event journal.
    pub migrated: usize,
    /// Entries whose id was already present in the target journal.
    pub already_present: usize,
    /// Entries left in the legacy files.
    pub failed: usize,
    /// Events that received entries.
    pub events: BTreeSet<EventId>,
}

impl MigrationReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    /// Returns true if every legacy entry has moved.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Moves legacy records into per-event journals.
#[derive(Debug)]
pub struct MigrationManager<'a> {
    dir: &'a DataDir,
}

impl<'a> MigrationManager<'a> {
    /// Creates a manager for a data directory.
    #[must_use]
    pub fn new(dir: &'a DataDir) -> Self {
        Self { dir }
    }

    /// Runs the migration unless it has already completed.
    ///
    /// Safe to call on every start.
    pub fn run_if_needed(&self) -> CoreResult<MigrationReport> {
        self.run(false)
    }

    /// Runs the migration; `force` re-processes entries left in the legacy
    /// files even when the flag is set.
    pub fn run(&self, force: bool) -> CoreResult<MigrationReport> {
        if self.dir.is_migrated() && !force {
            tracing::debug!(path = %self.dir.path().display(), "legacy migration already done");
            return Ok(MigrationReport::skipped());
        }

        let mut report = MigrationReport::default();
        self.migrate_kind::<PendingItem>(&mut report)?;
        self.migrate_kind::<PendingScan>(&mut report)?;
        self.migrate_kind::<CommittedScan>(&mut report)?;

        if !self.dir.is_migrated() {
            self.dir.mark_migrated()?;
        }

        tracing::info!(
            migrated = report.migrated,
            already_present = report.already_present,
            failed = report.failed,
            events = report.events.len(),
            "legacy migration pass finished"
        );
        Ok(report)
    }

    fn migrate_kind<R: JournalRecord>(&self, report: &mut MigrationReport) -> CoreResult<()> {
        let path = self.dir.legacy_path(R::KIND);
        if !path.exists() {
            return Ok(());
        }

        let data = fs::read(&path).map_err(|e| {
            CoreError::migration_failed(format!("cannot read {}: {e}", path.display()))
        })?;

        let mut retained: Vec<(usize, &[u8])> = Vec::new();
        let mut groups: BTreeMap<EventId, Vec<(usize, &[u8], R)>> = BTreeMap::new();
        let mut total = 0;

        for (index, raw) in data.split(|b| *b == b'\n').enumerate() {
            if raw.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            total += 1;
            match parse_legacy_line::<R>(raw) {
                Ok((event_id, record)) => groups.entry(event_id).or_default().push((index, raw, record)),
                Err(reason) => {
                    tracing::warn!(kind = %R::KIND, line = index + 1, %reason, "legacy entry not migrated");
                    report.failed += 1;
                    retained.push((index, raw));
                }
            }
        }

        for (event_id, entries) in groups {
            let records: Vec<R> = entries.iter().map(|(_, _, r)| r.clone()).collect();
            let outcome = self
                .dir
                .open_journal::<R>(&event_id)
                .and_then(|journal| journal.append_missing(&records));

            match outcome {
                Ok(appended) => {
                    report.migrated += appended;
                    report.already_present += records.len() - appended;
                    report.events.insert(event_id);
                }
                Err(e) => {
                    tracing::warn!(
                        kind = %R::KIND,
                        event_id = %event_id,
                        entries = entries.len(),
                        error = %e,
                        "legacy entries not migrated"
                    );
                    report.failed += entries.len();
                    retained.extend(entries.iter().map(|(index, raw, _)| (*index, *raw)));
                }
            }
        }

        if retained.is_empty() {
            self.dir.remove_legacy(R::KIND)?;
        } else if retained.len() < total {
            retained.sort_by_key(|(index, _)| *index);
            let mut content = Vec::new();
            for (_, raw) in retained {
                content.extend_from_slice(raw);
                content.push(b'\n');
            }
            let mut legacy = FileBackend::open(&path)?;
            legacy.replace(&content)?;
        }
        Ok(())
    }
}

/// Splits a legacy line into its event scope and record.
fn parse_legacy_line<R: JournalRecord>(raw: &[u8]) -> Result<(EventId, R), String> {
    let value: serde_json::Value = serde_json::from_slice(raw).map_err(|e| e.to_string())?;
    let event_id = value
        .get("event_id")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| "missing event_id".to_string())?;
    let event_id = EventId::new(event_id).map_err(|e| e.to_string())?;
    let record = serde_json::from_value::<R>(value).map_err(|e| e.to_string())?;
    Ok((event_id, record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::types::PaymentMethod;
    use tempfile::tempdir;

    fn legacy_item(event: &str, id: &str) -> String {
        format!(
            r#"{{"event_id":"{event}","item_id":"{id}","purchase_id":"p","seller_id":3,"price":500,"error_text":"","timestamp":1}}"#
        )
    }

    fn write_legacy(dir: &DataDir, kind: RecordKind, lines: &[String]) {
        fs::create_dir_all(dir.legacy_dir()).unwrap();
        let mut content = lines.join("\n");
        content.push('\n');
        fs::write(dir.legacy_path(kind), content).unwrap();
    }

    #[test]
    fn moves_items_into_event_journals() {
        let temp = tempdir().unwrap();
        let dir = DataDir::open(temp.path(), &QueueConfig::default()).unwrap();
        write_legacy(
            &dir,
            RecordKind::PendingItems,
            &[legacy_item("ev-a", "i1"), legacy_item("ev-b", "i2"), legacy_item("ev-a", "i3")],
        );

        let report = MigrationManager::new(&dir).run_if_needed().unwrap();
        assert_eq!(report.migrated, 3);
        assert!(report.is_complete());
        assert_eq!(report.events.len(), 2);
        assert!(dir.is_migrated());
        assert!(!dir.legacy_path(RecordKind::PendingItems).exists());

        let a = dir
            .open_journal::<PendingItem>(&EventId::new("ev-a").unwrap())
            .unwrap()
            .list_pending()
            .unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].error_text, None);
        assert_eq!(a[0].payment_method, PaymentMethod::Unspecified);
    }

    #[test]
    fn bad_entries_stay_in_legacy_file() {
        let temp = tempdir().unwrap();
        let dir = DataDir::open(temp.path(), &QueueConfig::default()).unwrap();
        write_legacy(
            &dir,
            RecordKind::PendingItems,
            &[
                legacy_item("ev-a", "i1"),
                r#"{"item_id":"orphan","purchase_id":"p","seller_id":3,"price":1,"timestamp":1}"#.into(),
                "not json".into(),
            ],
        );

        let report = MigrationManager::new(&dir).run_if_needed().unwrap();
        assert_eq!(report.migrated, 1);
        assert_eq!(report.failed, 2);
        assert!(dir.is_migrated());

        let remaining = fs::read_to_string(dir.legacy_path(RecordKind::PendingItems)).unwrap();
        assert_eq!(remaining.lines().count(), 2);
        assert!(remaining.contains("orphan"));
    }

    #[test]
    fn partial_prior_migration_is_not_duplicated() {
        let temp = tempdir().unwrap();
        let dir = DataDir::open(temp.path(), &QueueConfig::default()).unwrap();
        let event = EventId::new("ev-a").unwrap();

        // A crash after appending i1 but before the legacy file was cleaned
        let journal = dir.open_journal::<PendingItem>(&event).unwrap();
        let parsed: (EventId, PendingItem) =
            parse_legacy_line(legacy_item("ev-a", "i1").as_bytes()).unwrap();
        journal.append(&parsed.1).unwrap();
        write_legacy(
            &dir,
            RecordKind::PendingItems,
            &[legacy_item("ev-a", "i1"), legacy_item("ev-a", "i2")],
        );

        let report = MigrationManager::new(&dir).run_if_needed().unwrap();
        assert_eq!(report.migrated, 1);
        assert_eq!(report.already_present, 1);
        assert_eq!(journal.len().unwrap(), 2);
    }

    #[test]
    fn scans_keep_their_event() {
        let temp = tempdir().unwrap();
        let dir = DataDir::open(temp.path(), &QueueConfig::default()).unwrap();
        write_legacy(
            &dir,
            RecordKind::PendingScans,
            &[r#"{"scan_id":"s1","ticket_id":"T-1","event_id":"ev-a","scanned_at":5,"error_text":""}"#.into()],
        );

        let report = MigrationManager::new(&dir).run_if_needed().unwrap();
        assert_eq!(report.migrated, 1);

        let scans = dir
            .open_journal::<PendingScan>(&EventId::new("ev-a").unwrap())
            .unwrap()
            .list_pending()
            .unwrap();
        assert_eq!(scans[0].event_id.as_str(), "ev-a");
    }

    #[test]
    fn flag_set_without_legacy_data() {
        let temp = tempdir().unwrap();
        let dir = DataDir::open(temp.path(), &QueueConfig::default()).unwrap();

        let first = MigrationManager::new(&dir).run_if_needed().unwrap();
        assert!(!first.skipped);
        assert_eq!(first.migrated, 0);

        let second = MigrationManager::new(&dir).run_if_needed().unwrap();
        assert!(second.skipped);
    }

    #[test]
    fn force_retries_retained_entries() {
        let temp = tempdir().unwrap();
        let dir = DataDir::open(temp.path(), &QueueConfig::default()).unwrap();
        write_legacy(&dir, RecordKind::PendingItems, &["garbage".into()]);

        let first = MigrationManager::new(&dir).run_if_needed().unwrap();
        assert_eq!(first.failed, 1);

        // Operator repairs the line, then forces another pass
        write_legacy(&dir, RecordKind::PendingItems, &[legacy_item("ev-a", "fixed")]);
        assert!(MigrationManager::new(&dir).run_if_needed().unwrap().skipped);

        let forced = MigrationManager::new(&dir).run(true).unwrap();
        assert_eq!(forced.migrated, 1);
        assert!(!dir.legacy_path(RecordKind::PendingItems).exists());
    }
}
