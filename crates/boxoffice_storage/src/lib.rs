//! # BoxOffice Storage
//!
//! Crash-safe storage backends for the BoxOffice offline queue.
//!
//! Storage backends are **opaque byte stores** - they do not interpret
//! the journal lines they hold.
//!
//! ## Design Principles
//!
//! - Every mutation is all-or-nothing with respect to a process crash
//! - No knowledge of record formats; `boxoffice_core` owns line encoding
//! - Must be `Send + Sync` so a journal can be shared across threads
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral queues
//! - [`FileBackend`] - Write-to-temporary-then-rename persistent storage
//!
//! ## Example
//!
//! ```rust
//! use boxoffice_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"{\"id\":1}\n").unwrap();
//! assert_eq!(offset, 0);
//! assert_eq!(backend.read_all().unwrap(), b"{\"id\":1}\n");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::{FileBackend, TEMP_SUFFIX};
pub use memory::InMemoryBackend;
