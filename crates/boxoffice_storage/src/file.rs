//! File-based storage backend for persistent storage.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Suffix of the temporary file used for atomic writes.
pub const TEMP_SUFFIX: &str = ".tmp";

/// A file-based storage backend.
///
/// Every mutation rewrites the file through a temporary sibling:
///
/// 1. Write the complete new content to `<file>.tmp`
/// 2. Sync the temporary file to disk
/// 3. Rename the temporary file over `<file>`
/// 4. Fsync the parent directory so the rename itself is durable
///
/// A crash before step 3 leaves the old file intact (the stale temporary file
/// is discarded on the next open); a crash after step 3 leaves the new file.
/// A journal therefore never observes a partially written record.
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
/// Internal locking ensures consistent access.
///
/// # Example
///
/// ```no_run
/// use boxoffice_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("pending_items.jsonl")).unwrap();
/// backend.append(b"{\"item_id\":\"01J...\"}\n").unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    temp_path: PathBuf,
    size: RwLock<u64>,
    sync_directory: bool,
}

impl FileBackend {
    /// Opens or creates a file backend at the given path.
    ///
    /// A leftover temporary file from an interrupted write is removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created, or if the
    /// path names a directory.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if path.is_dir() {
            return Err(StorageError::InvalidPath(format!(
                "{} is a directory",
                path.display()
            )));
        }

        let temp_path = Self::temp_path_for(path);
        if temp_path.exists() {
            tracing::warn!(
                path = %temp_path.display(),
                "discarding temporary file left by an interrupted write"
            );
            fs::remove_file(&temp_path)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            temp_path,
            size: RwLock::new(size),
            sync_directory: true,
        })
    }

    /// Opens or creates a file backend, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or file cannot be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Enables or disables the directory fsync after each rename.
    #[must_use]
    pub fn with_directory_sync(mut self, enabled: bool) -> Self {
        self.sync_directory = enabled;
        self
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the temporary path used while rewriting `path`.
    #[must_use]
    pub fn temp_path_for(path: &Path) -> PathBuf {
        let mut name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(TEMP_SUFFIX);
        path.with_file_name(name)
    }

    fn write_atomically(&self, data: &[u8]) -> StorageResult<()> {
        let mut file = File::create(&self.temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.temp_path, &self.path)?;

        if self.sync_directory {
            self.sync_parent()?;
        }
        Ok(())
    }

    /// Syncs the parent directory so the rename survives power loss.
    #[cfg(unix)]
    fn sync_parent(&self) -> StorageResult<()> {
        // A bare file name has an empty parent.
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            let dir = File::open(parent)?;
            dir.sync_all()?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_parent(&self) -> StorageResult<()> {
        // NTFS journals metadata updates; directory handles cannot be fsynced
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        match fs::read(&self.path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut size = self.size.write();
        if data.is_empty() {
            return Ok(*size);
        }

        let mut content = self.read_all()?;
        let offset = content.len() as u64;
        content.extend_from_slice(data);
        self.write_atomically(&content)?;
        *size = content.len() as u64;

        Ok(offset)
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        let mut size = self.size.write();
        self.write_atomically(data)?;
        *size = data.len() as u64;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }
}
