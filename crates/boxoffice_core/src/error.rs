//! Error types for BoxOffice core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in BoxOffice core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] boxoffice_storage::StorageError),

    /// JSON line encoding error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Another process holds the data directory lock.
    #[error("data directory locked: another process has exclusive access")]
    DataDirLocked,

    /// Invalid on-disk layout.
    #[error("invalid data directory: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// A string is not a well-formed identifier.
    #[error("invalid identifier: {value:?}")]
    InvalidIdentifier {
        /// The rejected input.
        value: String,
    },

    /// An event id cannot be used as a journal scope.
    #[error("invalid event id: {value:?}")]
    InvalidEventId {
        /// The rejected input.
        value: String,
    },

    /// A record was not found.
    #[error("{kind} record not found: {id}")]
    RecordNotFound {
        /// The journal kind searched.
        kind: &'static str,
        /// The identifier that was not found.
        id: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Migration failed.
    #[error("migration failed: {message}")]
    MigrationFailed {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid identifier error.
    pub fn invalid_identifier(value: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            value: value.into(),
        }
    }

    /// Creates a record not found error.
    pub fn record_not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::RecordNotFound {
            kind,
            id: id.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a migration failed error.
    pub fn migration_failed(message: impl Into<String>) -> Self {
        Self::MigrationFailed {
            message: message.into(),
        }
    }
}
