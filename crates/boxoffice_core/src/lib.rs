//! # BoxOffice Core
//!
//! Offline durable queue for a point-of-sale and ticket-scanning client.
//!
//! This crate provides:
//! - Time-ordered identifiers for purchases, items and scans
//! - Crash-safe journals of unsynced work, one per record kind and event
//! - The commit ledger used to reject duplicate scans while offline
//! - Classification and recovery of purchases rejected by the remote service
//! - The one-time migration from the legacy single-store layout
//!
//! ## Example
//!
//! ```rust
//! use boxoffice_core::{EventId, EventQueue, NewSale, PaymentMethod, ScanOutcome};
//!
//! let queue = EventQueue::in_memory(EventId::new("summer-fest").unwrap());
//! queue
//!     .record_purchase(&[NewSale::new(3, 1500, PaymentMethod::Cash)])
//!     .unwrap();
//!
//! assert!(matches!(queue.record_scan("T-1").unwrap(), ScanOutcome::Accepted(_)));
//! assert!(matches!(queue.record_scan("T-1").unwrap(), ScanOutcome::Duplicate(_)));
//! assert_eq!(queue.pending_counts().unwrap().unsynced(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod dir;
mod error;
mod id;
mod journal;
mod ledger;
mod migration;
mod queue;
mod record;
mod recovery;
mod rejection;
mod types;

pub use config::QueueConfig;
pub use dir::DataDir;
pub use error::{CoreError, CoreResult};
pub use id::{Clock, IdGenerator, Identifier, ALPHABET, ENCODED_LEN, TIME_LEN};
pub use journal::{Journal, JournalHealth};
pub use ledger::CommitLedger;
pub use migration::{MigrationManager, MigrationReport, LEGACY_KINDS};
pub use queue::{EventQueue, NewSale, PendingCounts, QueueBackends, RecordedPurchase, ScanOutcome};
pub use record::{decode_lines, encode_line, DecodedLines, JournalRecord, MalformedLine, RecordKind, Retryable};
pub use recovery::{RecoveryManager, RecoveryResult, DEFAULT_MAX_ATTEMPTS};
pub use rejection::{classify, ErrorCode, RejectedItemWithDetails, RejectedPurchase, RejectionStore};
pub use types::{
    now_millis, CommittedScan, EventId, Millis, PaymentMethod, PendingItem, PendingScan,
    ScanStatus, StoredSoldItem,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
