//! Queue configuration.

use crate::recovery::DEFAULT_MAX_ATTEMPTS;

/// Configuration for opening a data directory and its event queues.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Whether to create the data directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Failed automatic recovery attempts before a purchase is parked for
    /// manual review.
    pub max_auto_recovery_attempts: u32,

    /// Whether to fsync the parent directory after each journal rename.
    pub sync_directory: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            max_auto_recovery_attempts: DEFAULT_MAX_ATTEMPTS,
            sync_directory: true,
        }
    }
}

impl QueueConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the data directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the automatic recovery attempt cap.
    #[must_use]
    pub const fn max_auto_recovery_attempts(mut self, value: u32) -> Self {
        self.max_auto_recovery_attempts = value;
        self
    }

    /// Sets whether directory metadata is fsynced after renames.
    #[must_use]
    pub const fn sync_directory(mut self, value: bool) -> Self {
        self.sync_directory = value;
        self
    }
}
