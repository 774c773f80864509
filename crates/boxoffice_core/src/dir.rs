//! Data directory management.
//!
//! This module handles the file system layout for BoxOffice:
//!
//! ```text
//! <data_dir>/
//! ├─ LOCK                     # Advisory lock for single-writer
//! ├─ MIGRATED                 # One-shot legacy migration flag
//! ├─ legacy/                  # Pre-per-event layout, one file per kind
//! │  ├─ pending_items.jsonl
//! │  ├─ pending_scans.jsonl
//! │  └─ committed_scans.jsonl
//! └─ events/<event_id>/
//!    ├─ pending_items.jsonl
//!    ├─ pending_scans.jsonl
//!    ├─ committed_scans.jsonl
//!    ├─ rejected_purchases.jsonl
//!    └─ sold_items.jsonl
//! ```
//!
//! The LOCK file ensures only one process writes to the queues at a time.

use crate::config::QueueConfig;
use crate::error::{CoreError, CoreResult};
use crate::journal::Journal;
use crate::record::{JournalRecord, RecordKind};
use crate::types::{now_millis, EventId};
use boxoffice_storage::FileBackend;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const MIGRATED_FILE: &str = "MIGRATED";
const MIGRATED_TEMP: &str = "MIGRATED.tmp";
const LEGACY_DIR: &str = "legacy";
const EVENTS_DIR: &str = "events";

/// Manages the data directory structure and file locking.
///
/// # Thread Safety
///
/// The `DataDir` holds an exclusive lock on the directory. Only one
/// `DataDir` instance can exist per directory at a time; share it with `Arc`.
#[derive(Debug)]
pub struct DataDir {
    path: PathBuf,
    sync_directory: bool,
    _lock_file: File,
}

impl DataDir {
    /// Opens or creates a data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `DataDirLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, config: &QueueConfig) -> CoreResult<Self> {
        if !path.exists() {
            if config.create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "data directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DataDirLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            sync_directory: config.sync_directory,
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the data directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the directory holding the legacy single-store files.
    #[must_use]
    pub fn legacy_dir(&self) -> PathBuf {
        self.path.join(LEGACY_DIR)
    }

    /// Returns the legacy file of a record kind.
    #[must_use]
    pub fn legacy_path(&self, kind: RecordKind) -> PathBuf {
        self.legacy_dir().join(kind.file_name())
    }

    /// Returns the directory holding every event's journals.
    #[must_use]
    pub fn events_dir(&self) -> PathBuf {
        self.path.join(EVENTS_DIR)
    }

    /// Returns the directory of one event.
    #[must_use]
    pub fn event_dir(&self, event_id: &EventId) -> PathBuf {
        self.events_dir().join(event_id.as_str())
    }

    /// Returns the journal file of a kind for one event.
    #[must_use]
    pub fn journal_path(&self, event_id: &EventId, kind: RecordKind) -> PathBuf {
        self.event_dir(event_id).join(kind.file_name())
    }

    /// Opens the file backend of a journal, creating its directory.
    pub fn open_backend(&self, event_id: &EventId, kind: RecordKind) -> CoreResult<FileBackend> {
        let backend = FileBackend::open_with_create_dirs(&self.journal_path(event_id, kind))?;
        Ok(backend.with_directory_sync(self.sync_directory))
    }

    /// Opens the journal of record type `R` for one event.
    pub fn open_journal<R: JournalRecord>(&self, event_id: &EventId) -> CoreResult<Journal<R>> {
        let backend = self.open_backend(event_id, R::KIND)?;
        Ok(Journal::open(event_id.clone(), Box::new(backend)))
    }

    /// Lists the events that have a journal directory, sorted by id.
    ///
    /// Directory names that are not valid event ids are skipped.
    pub fn list_events(&self) -> CoreResult<Vec<EventId>> {
        let events_dir = self.events_dir();
        if !events_dir.exists() {
            return Ok(Vec::new());
        }

        let mut events = Vec::new();
        for entry in fs::read_dir(&events_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match EventId::new(name) {
                Ok(event_id) => events.push(event_id),
                Err(e) => tracing::warn!(path = %entry.path().display(), error = %e, "ignoring event directory"),
            }
        }
        events.sort();
        Ok(events)
    }

    /// Returns the path of the migration flag.
    #[must_use]
    pub fn migration_flag_path(&self) -> PathBuf {
        self.path.join(MIGRATED_FILE)
    }

    /// Returns true once the legacy migration has completed.
    #[must_use]
    pub fn is_migrated(&self) -> bool {
        self.migration_flag_path().exists()
    }

    /// Persists the migration flag atomically.
    ///
    /// Uses write-then-rename so the flag never exists half written.
    pub fn mark_migrated(&self) -> CoreResult<()> {
        let temp_path = self.path.join(MIGRATED_TEMP);

        let mut file = File::create(&temp_path)?;
        writeln!(file, "{}", now_millis())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.migration_flag_path())?;
        self.sync_dir(&self.path)
    }

    /// Deletes a legacy file once every entry has moved.
    pub fn remove_legacy(&self, kind: RecordKind) -> CoreResult<()> {
        let path = self.legacy_path(kind);
        if path.exists() {
            fs::remove_file(&path)?;
            self.sync_dir(&self.legacy_dir())?;
        }
        Ok(())
    }

    #[cfg(unix)]
    fn sync_dir(&self, dir: &Path) -> CoreResult<()> {
        if self.sync_directory {
            File::open(dir)?.sync_all()?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_dir(&self, _dir: &Path) -> CoreResult<()> {
        // NTFS journals metadata; directories cannot be fsynced on Windows
        Ok(())
    }
}
