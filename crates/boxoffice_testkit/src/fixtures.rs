//! Test fixtures and queue helpers.
//!
//! Provides convenience functions for setting up data directories, event
//! queues and legacy files for migration scenarios.

use boxoffice_core::{
    DataDir, EventId, EventQueue, IdGenerator, NewSale, PaymentMethod, QueueConfig, RecordKind,
};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Builds an event id, panicking on an invalid name.
pub fn event(name: &str) -> EventId {
    EventId::new(name).expect("valid event id")
}

/// A cash sale.
pub fn sale(seller_id: i64, price: i64) -> NewSale {
    NewSale::new(seller_id, price, PaymentMethod::Cash)
}

/// An in-memory queue for `name`.
pub fn memory_queue(name: &str) -> EventQueue {
    EventQueue::in_memory(event(name))
}

/// An identifier generator whose clock advances one millisecond per id,
/// starting at `start_ms`.
pub fn stepping_ids(start_ms: u64) -> IdGenerator {
    let now = Arc::new(AtomicU64::new(start_ms));
    IdGenerator::with_clock(Arc::new(move || now.fetch_add(1, Ordering::SeqCst)))
}

/// A data directory with automatic cleanup.
pub struct TestDataDir {
    /// The opened, locked data directory.
    pub dir: DataDir,
    config: QueueConfig,
    // Dropped last so the lock file is closed before cleanup.
    temp: TempDir,
}

impl TestDataDir {
    /// Creates a fresh data directory with the default configuration.
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    /// Creates a fresh data directory.
    pub fn with_config(config: QueueConfig) -> Self {
        let temp = TempDir::new().expect("create temp directory");
        let dir = DataDir::open(temp.path(), &config).expect("open data directory");
        Self { dir, config, temp }
    }

    /// Returns the data directory path.
    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    /// Opens the file-backed queue of `name`.
    pub fn queue(&self, name: &str) -> EventQueue {
        EventQueue::open(&self.dir, event(name), &self.config).expect("open event queue")
    }

    /// Writes a legacy store file of `kind` containing `lines`.
    pub fn write_legacy(&self, kind: RecordKind, lines: &[Value]) {
        write_legacy(&self.dir, kind, lines);
    }
}

impl Default for TestDataDir {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestDataDir {
    type Target = DataDir;

    fn deref(&self) -> &Self::Target {
        &self.dir
    }
}

/// Writes a legacy store file of `kind`, one JSON object per line.
pub fn write_legacy(dir: &DataDir, kind: RecordKind, lines: &[Value]) {
    fs::create_dir_all(dir.legacy_dir()).expect("create legacy directory");
    let mut content = String::new();
    for line in lines {
        content.push_str(&line.to_string());
        content.push('\n');
    }
    fs::write(dir.legacy_path(kind), content).expect("write legacy file");
}

/// A legacy pending item line.
pub fn legacy_item(event_id: &str, item_id: &str, purchase_id: &str, seller_id: i64) -> Value {
    json!({
        "event_id": event_id,
        "item_id": item_id,
        "purchase_id": purchase_id,
        "seller_id": seller_id,
        "price": 1000,
        "payment_method": "cash",
        "error_text": "",
        "timestamp": 1_700_000_000_000u64,
    })
}

/// A legacy pending scan line.
pub fn legacy_scan(event_id: &str, scan_id: &str, ticket_id: &str) -> Value {
    json!({
        "event_id": event_id,
        "scan_id": scan_id,
        "ticket_id": ticket_id,
        "scanned_at": 1_700_000_000_000u64,
        "error_text": "",
    })
}

/// A legacy committed scan line.
pub fn legacy_commit(event_id: &str, scan_id: &str, ticket_id: &str, status: &str) -> Value {
    json!({
        "event_id": event_id,
        "scan_id": scan_id,
        "ticket_id": ticket_id,
        "scanned_at": 1_700_000_000_000u64,
        "committed_at": 1_700_000_000_500u64,
        "was_offline": true,
        "status": status,
    })
}
