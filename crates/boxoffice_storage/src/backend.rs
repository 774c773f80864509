//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level storage backend for a single journal.
///
/// Storage backends are **opaque byte stores**. They provide whole-content
/// reads plus two mutations, `append` and `replace`, both of which must be
/// atomic with respect to a process crash: after a crash the content is
/// either exactly the pre-mutation bytes or exactly the post-mutation bytes.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_all` returns exactly the bytes of the last completed mutation
/// - A failed mutation leaves previously committed bytes untouched
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Reads the full current content.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn read_all(&self) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the storage.
    ///
    /// Returns the offset where the data was written. The append is durable
    /// once this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs. On error the storage still
    /// holds its previous content.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Replaces the full content with `data`.
    ///
    /// Used to delete or rewrite individual lines. Durable once this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs. On error the storage still
    /// holds its previous content.
    fn replace(&mut self, data: &[u8]) -> StorageResult<()>;

    /// Returns the current size of the storage in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;
}

impl<B: StorageBackend + ?Sized> StorageBackend for Box<B> {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        (**self).read_all()
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        (**self).append(data)
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        (**self).replace(data)
    }

    fn size(&self) -> StorageResult<u64> {
        (**self).size()
    }
}
