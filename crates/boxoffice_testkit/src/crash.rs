//! Crash recovery testing for file-backed journals.
//!
//! [`CrashableBackend`] replays the write-to-temporary-then-rename sequence
//! of [`FileBackend`] but stops at a chosen [`CrashPoint`], leaving the
//! files exactly as a killed process would. Reopening the path with a plain
//! `FileBackend` then shows what a restarted process sees.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use boxoffice_testkit::crash::{crash_during, CrashOutcome, CrashPoint};
//!
//! let outcome = crash_during(&path, &event, &seed, CrashPoint::BeforeRename, |j| j.append(&item));
//! assert_eq!(outcome, CrashOutcome::PreState);
//! ```

use boxoffice_core::{CoreResult, EventId, Journal, JournalRecord};
use boxoffice_storage::{FileBackend, InMemoryBackend, StorageBackend, StorageError, StorageResult};
use std::fmt::Debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Points at which a crash can be simulated during a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// Crash before the temporary file is created.
    BeforeTempWrite,
    /// Crash after this many bytes of the new content reached the temporary
    /// file.
    DuringTempWrite {
        /// Bytes written before the crash.
        bytes: usize,
    },
    /// Crash after the temporary file is complete, before the rename.
    BeforeRename,
    /// Crash right after the rename, before the directory sync.
    AfterRename,
}

impl CrashPoint {
    /// Returns true if the mutation is durable at this point.
    pub fn survives(&self) -> bool {
        matches!(self, CrashPoint::AfterRename)
    }

    /// Returns a representative set of crash points for content of `len`
    /// bytes.
    pub fn representative(len: usize) -> Vec<CrashPoint> {
        let mut points = vec![CrashPoint::BeforeTempWrite];
        for bytes in [0, len / 2, len.saturating_sub(1)] {
            let point = CrashPoint::DuringTempWrite { bytes };
            if !points.contains(&point) {
                points.push(point);
            }
        }
        points.push(CrashPoint::BeforeRename);
        points.push(CrashPoint::AfterRename);
        points
    }
}

/// What a restarted process sees after a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashOutcome {
    /// The content before the mutation.
    PreState,
    /// The content after the mutation.
    PostState,
    /// Anything else.
    Torn,
}

/// A file backend that crashes on its first mutation.
///
/// Reads pass through until the crash; afterwards every call fails, as the
/// process that owned the backend is gone.
pub struct CrashableBackend {
    inner: FileBackend,
    path: PathBuf,
    crash_at: Option<CrashPoint>,
    crashed: Arc<AtomicBool>,
}

impl CrashableBackend {
    /// Opens `path`, armed to crash at `point`.
    pub fn open(path: &Path, point: CrashPoint) -> StorageResult<Self> {
        Ok(Self {
            inner: FileBackend::open(path)?,
            path: path.to_path_buf(),
            crash_at: Some(point),
            crashed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Returns a flag that turns true once the crash happened.
    pub fn crashed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.crashed)
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    fn ensure_alive(&self) -> StorageResult<()> {
        if self.has_crashed() {
            return Err(StorageError::Io(io::Error::other("backend crashed")));
        }
        Ok(())
    }

    fn crash(&mut self, point: CrashPoint, content: &[u8]) -> StorageError {
        self.crashed.store(true, Ordering::SeqCst);
        let temp = FileBackend::temp_path_for(&self.path);

        let written = match point {
            CrashPoint::BeforeTempWrite => Ok(()),
            CrashPoint::DuringTempWrite { bytes } => {
                fs::write(&temp, &content[..bytes.min(content.len())])
            }
            CrashPoint::BeforeRename => fs::write(&temp, content),
            CrashPoint::AfterRename => {
                fs::write(&temp, content).and_then(|()| fs::rename(&temp, &self.path))
            }
        };

        match written {
            Ok(()) => StorageError::Io(io::Error::other(format!("simulated crash at {point:?}"))),
            Err(e) => StorageError::Io(e),
        }
    }
}

impl StorageBackend for CrashableBackend {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        self.ensure_alive()?;
        self.inner.read_all()
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.ensure_alive()?;
        match self.crash_at.take() {
            Some(point) => {
                let mut content = self.inner.read_all()?;
                content.extend_from_slice(data);
                Err(self.crash(point, &content))
            }
            None => self.inner.append(data),
        }
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        self.ensure_alive()?;
        match self.crash_at.take() {
            Some(point) => Err(self.crash(point, data)),
            None => self.inner.replace(data),
        }
    }

    fn size(&self) -> StorageResult<u64> {
        self.ensure_alive()?;
        self.inner.size()
    }
}

/// Runs `mutate` against a journal at `path` that crashes mid-write, then
/// reopens the journal and classifies what survived.
///
/// The journal is first seeded with `seed`. The expected pre and post states
/// come from running the same mutation on an in-memory twin.
///
/// # Panics
///
/// Panics if the seed cannot be written or the journal cannot be reopened.
pub fn crash_during<R, F>(
    path: &Path,
    event_id: &EventId,
    seed: &[R],
    point: CrashPoint,
    mutate: F,
) -> CrashOutcome
where
    R: JournalRecord + PartialEq + Debug,
    F: Fn(&Journal<R>) -> CoreResult<()>,
{
    let model = Journal::<R>::open(event_id.clone(), Box::new(InMemoryBackend::new()));
    if !seed.is_empty() {
        model.append_all(seed).expect("seed in-memory journal");
    }
    let pre = model.list_pending().expect("read pre state");
    mutate(&model).expect("mutation succeeds without a crash");
    let post = model.list_pending().expect("read post state");

    {
        let backend = FileBackend::open_with_create_dirs(path).expect("open journal file");
        let journal = Journal::<R>::open(event_id.clone(), Box::new(backend));
        if !seed.is_empty() {
            journal.append_all(seed).expect("seed journal file");
        }
    }

    {
        let backend = CrashableBackend::open(path, point).expect("open crashable backend");
        let journal = Journal::<R>::open(event_id.clone(), Box::new(backend));
        // The error is the crash itself.
        let _ = mutate(&journal);
    }

    let backend = FileBackend::open(path).expect("reopen journal file");
    let recovered = Journal::<R>::open(event_id.clone(), Box::new(backend))
        .list_pending()
        .expect("read recovered state");

    if recovered == post {
        CrashOutcome::PostState
    } else if recovered == pre {
        CrashOutcome::PreState
    } else {
        CrashOutcome::Torn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn representative_points_are_distinct() {
        let points = CrashPoint::representative(1);
        assert_eq!(
            points,
            vec![
                CrashPoint::BeforeTempWrite,
                CrashPoint::DuringTempWrite { bytes: 0 },
                CrashPoint::BeforeRename,
                CrashPoint::AfterRename,
            ]
        );
        assert_eq!(CrashPoint::representative(10).len(), 6);
    }

    #[test]
    fn crash_before_rename_keeps_old_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pending.jsonl");
        FileBackend::open(&path).unwrap().append(b"a\n").unwrap();

        let mut backend = CrashableBackend::open(&path, CrashPoint::BeforeRename).unwrap();
        assert!(backend.append(b"b\n").is_err());
        assert!(backend.has_crashed());
        assert!(backend.read_all().is_err());

        assert_eq!(fs::read(FileBackend::temp_path_for(&path)).unwrap(), b"a\nb\n");
        assert_eq!(FileBackend::open(&path).unwrap().read_all().unwrap(), b"a\n");
    }

    #[test]
    fn crash_after_rename_keeps_new_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pending.jsonl");
        FileBackend::open(&path).unwrap().append(b"a\n").unwrap();

        let mut backend = CrashableBackend::open(&path, CrashPoint::AfterRename).unwrap();
        let flag = backend.crashed_flag();
        assert!(backend.replace(b"z\n").is_err());
        assert!(flag.load(Ordering::SeqCst));

        assert_eq!(FileBackend::open(&path).unwrap().read_all().unwrap(), b"z\n");
    }
}
