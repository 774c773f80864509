//! Rejected purchases and their classification.
//!
//! The remote service judges purchases as a unit: when one item fails, its
//! siblings come back rejected too, without an error of their own. Those
//! siblings are *collateral damage*; the item carrying a code or a reason is
//! the *primary* failure and decides how the whole purchase is recovered.

use crate::error::CoreResult;
use crate::journal::Journal;
use crate::record::{JournalRecord, RecordKind};
use crate::types::{EventId, Millis, StoredSoldItem};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Structured rejection code returned by the remote service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// No code of its own.
    #[default]
    Unspecified,
    /// The seller number is not approved for the event.
    InvalidSeller,
    /// The receipt was already recorded upstream.
    DuplicateReceipt,
    /// A code this build does not know.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::Unspecified => "unspecified",
            ErrorCode::InvalidSeller => "invalid_seller",
            ErrorCode::DuplicateReceipt => "duplicate_receipt",
            ErrorCode::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A rejected sold item with the remote service's verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedItemWithDetails {
    /// The rejected item.
    pub item: StoredSoldItem,
    /// Human readable reason, empty for collateral damage.
    #[serde(default)]
    pub reason: String,
    /// Structured code.
    #[serde(default)]
    pub error_code: ErrorCode,
}

impl RejectedItemWithDetails {
    /// Creates a rejected item.
    pub fn new(item: StoredSoldItem, reason: impl Into<String>, error_code: ErrorCode) -> Self {
        Self {
            item,
            reason: reason.into(),
            error_code,
        }
    }

    /// Returns true if the item was rejected only because a sibling failed.
    #[must_use]
    pub fn is_collateral_damage(&self) -> bool {
        self.error_code == ErrorCode::Unspecified && self.reason.is_empty()
    }

    /// Returns true if the item carries an error of its own.
    #[must_use]
    pub fn is_primary_error(&self) -> bool {
        !self.is_collateral_damage()
    }
}

/// A purchase rejected by the remote service, awaiting recovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedPurchase {
    /// Purchase id.
    pub purchase_id: String,
    /// Every item submitted with the purchase, in submission order.
    pub items: Vec<RejectedItemWithDetails>,
    /// Code of the first primary item.
    #[serde(default)]
    pub error_code: ErrorCode,
    /// Reason of the first primary item.
    #[serde(default)]
    pub error_message: String,
    /// First rejection time.
    pub timestamp: Millis,
    /// Failed automatic attempts so far. Never decreases.
    #[serde(default)]
    pub retry_attempts: u32,
    /// True once automatic recovery has run at least once.
    #[serde(default)]
    pub auto_recovery_attempted: bool,
    /// True if an operator has to act before the purchase is retried.
    #[serde(default)]
    pub needs_manual_review: bool,
}

impl RejectedPurchase {
    /// Creates a purchase from its rejected items.
    #[must_use]
    pub fn new(
        purchase_id: impl Into<String>,
        items: Vec<RejectedItemWithDetails>,
        timestamp: Millis,
    ) -> Self {
        let mut purchase = Self {
            purchase_id: purchase_id.into(),
            items,
            error_code: ErrorCode::Unspecified,
            error_message: String::new(),
            timestamp,
            retry_attempts: 0,
            auto_recovery_attempted: false,
            needs_manual_review: false,
        };
        purchase.refresh_summary();
        purchase
    }

    /// Recomputes the purchase-level code and message from the items.
    pub fn refresh_summary(&mut self) {
        let summary = self
            .primary_item()
            .map(|primary| (primary.error_code, primary.reason.clone()));
        let (code, message) = summary.unwrap_or((ErrorCode::Unspecified, String::new()));
        self.error_code = code;
        self.error_message = message;
    }

    /// Returns the first item carrying its own error.
    #[must_use]
    pub fn primary_item(&self) -> Option<&RejectedItemWithDetails> {
        self.items.iter().find(|i| i.is_primary_error())
    }

    /// Returns the items rejected only because of a sibling.
    pub fn collateral_items(&self) -> impl Iterator<Item = &RejectedItemWithDetails> {
        self.items.iter().filter(|i| i.is_collateral_damage())
    }

    /// Returns the distinct seller numbers rejected as invalid, in item order.
    #[must_use]
    pub fn invalid_sellers(&self) -> Vec<i64> {
        let mut sellers = Vec::new();
        for item in &self.items {
            if item.error_code == ErrorCode::InvalidSeller && !sellers.contains(&item.item.seller) {
                sellers.push(item.item.seller);
            }
        }
        sellers
    }

    /// Returns the summary reason, falling back to the code name.
    #[must_use]
    pub fn describe(&self) -> String {
        if self.error_message.is_empty() {
            format!("rejected with code {}", self.error_code)
        } else {
            self.error_message.clone()
        }
    }
}

impl JournalRecord for RejectedPurchase {
    const KIND: RecordKind = RecordKind::RejectedPurchases;

    fn record_id(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.purchase_id)
    }
}

/// Groups rejected items into purchases.
///
/// Purchases appear in the order their first item appears; items keep their
/// submission order. The first primary item of each group supplies the
/// purchase-level code and message.
#[must_use]
pub fn classify(items: Vec<RejectedItemWithDetails>, now: Millis) -> Vec<RejectedPurchase> {
    let mut groups: Vec<(String, Vec<RejectedItemWithDetails>)> = Vec::new();
    for item in items {
        match groups
            .iter_mut()
            .find(|(purchase_id, _)| *purchase_id == item.item.purchase_id)
        {
            Some((_, group)) => group.push(item),
            None => groups.push((item.item.purchase_id.clone(), vec![item])),
        }
    }

    groups
        .into_iter()
        .map(|(purchase_id, items)| RejectedPurchase::new(purchase_id, items, now))
        .collect()
}

/// Durable store of rejected purchases for one event.
#[derive(Debug)]
pub struct RejectionStore {
    journal: Journal<RejectedPurchase>,
}

impl RejectionStore {
    /// Wraps a journal of rejected purchases.
    pub fn new(journal: Journal<RejectedPurchase>) -> Self {
        Self { journal }
    }

    /// Returns the event this store is scoped to.
    #[must_use]
    pub fn event_id(&self) -> &EventId {
        self.journal.event_id()
    }

    /// Stores a freshly classified purchase, carrying over recovery state.
    ///
    /// If the purchase was rejected before, its first rejection time, attempt
    /// count and recovery flags are kept so attempts never reset.
    pub fn merge(&self, mut purchase: RejectedPurchase) -> CoreResult<RejectedPurchase> {
        if let Some(existing) = self.journal.get(&purchase.purchase_id)? {
            purchase.timestamp = existing.timestamp;
            purchase.retry_attempts = purchase.retry_attempts.max(existing.retry_attempts);
            purchase.auto_recovery_attempted |= existing.auto_recovery_attempted;
            purchase.needs_manual_review |= existing.needs_manual_review;
        }
        self.journal.upsert(&purchase)?;
        Ok(purchase)
    }

    /// Persists the current state of a purchase.
    pub fn save(&self, purchase: &RejectedPurchase) -> CoreResult<()> {
        self.journal.upsert(purchase)
    }

    /// Returns a purchase by id.
    pub fn get(&self, purchase_id: &str) -> CoreResult<Option<RejectedPurchase>> {
        self.journal.get(purchase_id)
    }

    /// Returns a purchase by id or a not-found error.
    pub fn require(&self, purchase_id: &str) -> CoreResult<RejectedPurchase> {
        self.journal.require(purchase_id)
    }

    /// Removes a purchase. Removing an absent purchase is a no-op.
    pub fn remove(&self, purchase_id: &str) -> CoreResult<bool> {
        self.journal.remove(purchase_id)
    }

    /// Returns every stored purchase.
    pub fn list(&self) -> CoreResult<Vec<RejectedPurchase>> {
        self.journal.list_pending()
    }

    /// Returns the purchases waiting for an operator.
    pub fn review_queue(&self) -> CoreResult<Vec<RejectedPurchase>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|p| p.needs_manual_review)
            .collect())
    }

    /// Returns the underlying journal.
    #[must_use]
    pub fn journal(&self) -> &Journal<RejectedPurchase> {
        &self.journal
    }
}
