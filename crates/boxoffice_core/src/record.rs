//! Journal record kinds and the JSON line codec.

use crate::error::CoreResult;
use crate::types::{CommittedScan, PendingItem, PendingScan, StoredSoldItem};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::borrow::Cow;
use std::fmt;

/// The kinds of journal kept per event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Sold items waiting for upload.
    PendingItems,
    /// Scans waiting for upload.
    PendingScans,
    /// Scan outcome history used for duplicate suppression.
    CommittedScans,
    /// Purchases rejected by the remote service.
    RejectedPurchases,
    /// Durable copies of sold items.
    SoldItems,
}

impl RecordKind {
    /// All kinds, in directory listing order.
    pub const ALL: [RecordKind; 5] = [
        RecordKind::PendingItems,
        RecordKind::PendingScans,
        RecordKind::CommittedScans,
        RecordKind::RejectedPurchases,
        RecordKind::SoldItems,
    ];

    /// Returns the journal name of this kind.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            RecordKind::PendingItems => "pending_items",
            RecordKind::PendingScans => "pending_scans",
            RecordKind::CommittedScans => "committed_scans",
            RecordKind::RejectedPurchases => "rejected_purchases",
            RecordKind::SoldItems => "sold_items",
        }
    }

    /// Returns the file name of this kind's journal.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.jsonl", self.name())
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A record that can be stored in a [`crate::Journal`].
pub trait JournalRecord: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// The journal this record belongs to.
    const KIND: RecordKind;

    /// Returns the key identifying this record within its journal.
    fn record_id(&self) -> Cow<'_, str>;
}

/// A pending record that carries a retry annotation.
pub trait Retryable: JournalRecord {
    /// Sets or clears the retry annotation.
    fn set_error_text(&mut self, text: Option<String>);
}

impl JournalRecord for PendingItem {
    const KIND: RecordKind = RecordKind::PendingItems;

    fn record_id(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.item_id)
    }
}

impl Retryable for PendingItem {
    fn set_error_text(&mut self, text: Option<String>) {
        self.error_text = text;
    }
}

impl JournalRecord for PendingScan {
    const KIND: RecordKind = RecordKind::PendingScans;

    fn record_id(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.scan_id)
    }
}

impl Retryable for PendingScan {
    fn set_error_text(&mut self, text: Option<String>) {
        self.error_text = text;
    }
}

impl JournalRecord for CommittedScan {
    const KIND: RecordKind = RecordKind::CommittedScans;

    // One scan can produce several outcomes (offline commit, then server
    // confirmation), so the status is part of the key.
    fn record_id(&self) -> Cow<'_, str> {
        Cow::Owned(format!("{}:{}", self.scan_id, self.status))
    }
}

impl JournalRecord for StoredSoldItem {
    const KIND: RecordKind = RecordKind::SoldItems;

    fn record_id(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.item_id)
    }
}

/// Encodes a record as one newline-terminated JSON line.
pub fn encode_line<R: JournalRecord>(record: &R) -> CoreResult<Vec<u8>> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    Ok(line)
}

/// A line that failed to decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedLine {
    /// One-based line number.
    pub line_number: usize,
    /// Decoder error message.
    pub error: String,
}

/// Result of decoding a journal's content.
#[derive(Debug, Clone)]
pub struct DecodedLines<R> {
    /// Records in file order.
    pub records: Vec<R>,
    /// Lines that could not be decoded.
    pub malformed: Vec<MalformedLine>,
}

/// Decodes journal content, skipping blank and malformed lines.
pub fn decode_lines<R: JournalRecord>(data: &[u8]) -> DecodedLines<R> {
    let mut records = Vec::new();
    let mut malformed = Vec::new();

    for (index, raw) in data.split(|b| *b == b'\n').enumerate() {
        if raw.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<R>(raw) {
            Ok(record) => records.push(record),
            Err(e) => malformed.push(MalformedLine {
                line_number: index + 1,
                error: e.to_string(),
            }),
        }
    }

    DecodedLines { records, malformed }
}
