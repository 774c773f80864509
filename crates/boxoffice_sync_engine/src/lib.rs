//! # BoxOffice Sync Engine
//!
//! Uploads the offline queue of one event to the remote service.
//!
//! This crate provides:
//! - Sync state machine (idle → draining → submitting → applying)
//! - Purchase batching that never splits a purchase
//! - Verdict application with rejection classification and auto-recovery
//! - Scan upload with local duplicate suppression
//! - HTTP transport abstraction and an in-process mock
//! - A tokio background worker with retry and backoff
//!
//! ## Key Invariants
//!
//! - An entry leaves the pending journal only after its verdict is stored
//! - Transient failures never reach the rejection store
//! - Cancellation takes effect between batches, never mid-verdict

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod http;
mod state;
mod transport;
mod wire;
mod worker;

pub use config::{RetryConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpFailure, HttpResponse, HttpTransport};
pub use state::{SyncEngine, SyncReport, SyncState, SyncStats};
pub use transport::{CallCounts, MockTransport, RemoteService};
pub use worker::{SyncEvent, SyncWorker, SyncWorkerHandle};
