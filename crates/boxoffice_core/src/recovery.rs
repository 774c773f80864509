//! Recovery of rejected purchases.
//!
//! Automatic recovery decides, per purchase, whether the rejection is already
//! resolved upstream, needs an operator, or may be retried. Operator actions
//! (seller correction, item removal, resubmission) live here too so every
//! mutation of a [`RejectedPurchase`] goes through one place.

use crate::error::{CoreError, CoreResult};
use crate::journal::Journal;
use crate::rejection::{ErrorCode, RejectedPurchase, RejectionStore};
use crate::types::PendingItem;

/// Default number of failed automatic attempts before a purchase is parked
/// for manual review.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Outcome of an automatic recovery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryResult {
    /// The purchase is resolved and can be discarded.
    Success,
    /// The attempt failed; the purchase may be retried later.
    Failed(String),
    /// An operator has to fix the listed seller numbers.
    NeedsManualReview(Vec<i64>),
}

impl RecoveryResult {
    /// Returns true for [`RecoveryResult::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, RecoveryResult::Success)
    }
}

/// Applies the recovery policy to rejected purchases.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryManager {
    max_attempts: u32,
}

impl Default for RecoveryManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl RecoveryManager {
    /// Creates a manager that parks purchases after `max_attempts` failures.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Returns the attempt cap.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Runs one automatic recovery attempt, updating the purchase's counters
    /// and flags in place.
    pub fn attempt_auto_recovery(&self, purchase: &mut RejectedPurchase) -> RecoveryResult {
        let first_attempt = !purchase.auto_recovery_attempted;
        purchase.auto_recovery_attempted = true;

        match purchase.error_code {
            ErrorCode::DuplicateReceipt => RecoveryResult::Success,
            ErrorCode::InvalidSeller if first_attempt => {
                purchase.needs_manual_review = true;
                RecoveryResult::NeedsManualReview(purchase.invalid_sellers())
            }
            _ => {
                purchase.retry_attempts = purchase.retry_attempts.saturating_add(1);
                if purchase.retry_attempts >= self.max_attempts {
                    purchase.needs_manual_review = true;
                }
                RecoveryResult::Failed(purchase.describe())
            }
        }
    }

    /// Runs automatic recovery and persists the outcome.
    ///
    /// A successful purchase is discarded from the store; any other outcome
    /// is saved with its updated counters.
    pub fn recover(
        &self,
        store: &RejectionStore,
        mut purchase: RejectedPurchase,
    ) -> CoreResult<RecoveryResult> {
        let result = self.attempt_auto_recovery(&mut purchase);
        match &result {
            RecoveryResult::Success => {
                store.remove(&purchase.purchase_id)?;
                tracing::info!(
                    event_id = %store.event_id(),
                    purchase_id = %purchase.purchase_id,
                    code = %purchase.error_code,
                    "rejected purchase already applied upstream, discarded"
                );
            }
            RecoveryResult::NeedsManualReview(sellers) => {
                store.save(&purchase)?;
                tracing::warn!(
                    event_id = %store.event_id(),
                    purchase_id = %purchase.purchase_id,
                    ?sellers,
                    "purchase needs manual review"
                );
            }
            RecoveryResult::Failed(reason) => {
                store.save(&purchase)?;
                tracing::warn!(
                    event_id = %store.event_id(),
                    purchase_id = %purchase.purchase_id,
                    attempts = purchase.retry_attempts,
                    needs_manual_review = purchase.needs_manual_review,
                    reason = %reason,
                    "automatic recovery failed"
                );
            }
        }
        Ok(result)
    }

    /// Puts a purchase's items back into the pending journal.
    ///
    /// Items already pending are not duplicated. The purchase stays in the
    /// store until the remote service accepts it. Returns the number of items
    /// re-entered.
    pub fn resubmit(
        &self,
        store: &RejectionStore,
        pending: &Journal<PendingItem>,
        purchase_id: &str,
    ) -> CoreResult<usize> {
        let mut purchase = store.require(purchase_id)?;
        if purchase.items.is_empty() {
            return Err(CoreError::invalid_operation(format!(
                "purchase {purchase_id} has no items left to resubmit"
            )));
        }

        let items: Vec<PendingItem> = purchase.items.iter().map(|i| i.item.to_pending()).collect();
        let appended = pending.append_missing(&items)?;

        purchase.needs_manual_review = purchase.retry_attempts >= self.max_attempts;
        store.save(&purchase)?;

        tracing::info!(
            event_id = %store.event_id(),
            purchase_id,
            items = appended,
            "resubmitted purchase"
        );
        Ok(appended)
    }

    /// Resubmits every purchase that failed automatically and is still under
    /// the attempt cap.
    ///
    /// Returns the ids of the purchases re-entered.
    pub fn resubmit_eligible(
        &self,
        store: &RejectionStore,
        pending: &Journal<PendingItem>,
    ) -> CoreResult<Vec<String>> {
        let mut resubmitted = Vec::new();
        for purchase in store.list()? {
            let eligible = purchase.auto_recovery_attempted
                && !purchase.needs_manual_review
                && purchase.retry_attempts < self.max_attempts
                && !purchase.items.is_empty();
            if !eligible {
                continue;
            }

            let items: Vec<PendingItem> =
                purchase.items.iter().map(|i| i.item.to_pending()).collect();
            if pending.append_missing(&items)? > 0 {
                tracing::debug!(
                    event_id = %store.event_id(),
                    purchase_id = %purchase.purchase_id,
                    attempts = purchase.retry_attempts,
                    "re-entered purchase for automatic retry"
                );
            }
            resubmitted.push(purchase.purchase_id);
        }
        Ok(resubmitted)
    }

    /// Changes the seller of one item and clears that item's error.
    pub fn correct_seller(
        &self,
        store: &RejectionStore,
        purchase_id: &str,
        item_id: &str,
        seller: i64,
    ) -> CoreResult<RejectedPurchase> {
        let mut purchase = store.require(purchase_id)?;
        let item = purchase
            .items
            .iter_mut()
            .find(|i| i.item.item_id == item_id)
            .ok_or_else(|| CoreError::record_not_found("rejected_item", item_id))?;

        item.item.seller = seller;
        item.reason.clear();
        item.error_code = ErrorCode::Unspecified;
        purchase.refresh_summary();
        store.save(&purchase)?;
        Ok(purchase)
    }

    /// Removes one item from a purchase.
    ///
    /// Dropping the last item discards the purchase; `None` is returned then.
    pub fn drop_item(
        &self,
        store: &RejectionStore,
        purchase_id: &str,
        item_id: &str,
    ) -> CoreResult<Option<RejectedPurchase>> {
        let mut purchase = store.require(purchase_id)?;
        let before = purchase.items.len();
        purchase.items.retain(|i| i.item.item_id != item_id);
        if purchase.items.len() == before {
            return Err(CoreError::record_not_found("rejected_item", item_id));
        }

        if purchase.items.is_empty() {
            store.remove(purchase_id)?;
            return Ok(None);
        }
        purchase.refresh_summary();
        store.save(&purchase)?;
        Ok(Some(purchase))
    }

    /// Discards a purchase without resubmitting it.
    pub fn discard(&self, store: &RejectionStore, purchase_id: &str) -> CoreResult<bool> {
        let removed = store.remove(purchase_id)?;
        if removed {
            tracing::info!(event_id = %store.event_id(), purchase_id, "discarded rejected purchase");
        }
        Ok(removed)
    }

    /// Returns the purchases waiting for an operator.
    pub fn review_queue(&self, store: &RejectionStore) -> CoreResult<Vec<RejectedPurchase>> {
        store.review_queue()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rejection::{classify, RejectedItemWithDetails};
    use crate::types::{EventId, PaymentMethod, StoredSoldItem};
    use boxoffice_storage::InMemoryBackend;

    fn event() -> EventId {
        EventId::new("ev-1").unwrap()
    }

    fn sold(item_id: &str, purchase_id: &str, seller: i64) -> StoredSoldItem {
        StoredSoldItem {
            item_id: item_id.into(),
            event_id: event(),
            purchase_id: purchase_id.into(),
            seller,
            price: 800,
            payment_method: PaymentMethod::Cash,
            sold_time: 1,
            uploaded: false,
        }
    }

    fn rejected(items: Vec<(&str, i64, &str, ErrorCode)>) -> RejectedPurchase {
        let details = items
            .into_iter()
            .map(|(id, seller, reason, code)| {
                RejectedItemWithDetails::new(sold(id, "p1", seller), reason, code)
            })
            .collect();
        classify(details, 1).remove(0)
    }

    fn stores() -> (RejectionStore, Journal<PendingItem>) {
        (
            RejectionStore::new(Journal::open(event(), Box::new(InMemoryBackend::new()))),
            Journal::open(event(), Box::new(InMemoryBackend::new())),
        )
    }

    #[test]
    fn duplicate_receipt_is_success() {
        let manager = RecoveryManager::default();
        let mut purchase = rejected(vec![("i1", 3, "seen", ErrorCode::DuplicateReceipt)]);

        assert_eq!(manager.attempt_auto_recovery(&mut purchase), RecoveryResult::Success);
        assert!(purchase.auto_recovery_attempted);
        assert_eq!(purchase.retry_attempts, 0);
    }

    #[test]
    fn invalid_seller_needs_review() {
        let manager = RecoveryManager::default();
        let mut purchase = rejected(vec![
            ("i1", 10, "seller 10 is not approved", ErrorCode::InvalidSeller),
            ("i2", 3, "", ErrorCode::Unspecified),
        ]);

        let result = manager.attempt_auto_recovery(&mut purchase);
        assert_eq!(result, RecoveryResult::NeedsManualReview(vec![10]));
        assert!(purchase.needs_manual_review);
    }

    #[test]
    fn unknown_code_fails_until_cap() {
        let manager = RecoveryManager::new(2);
        let mut purchase = rejected(vec![("i1", 3, "upstream exploded", ErrorCode::Unknown)]);

        let first = manager.attempt_auto_recovery(&mut purchase);
        assert_eq!(first, RecoveryResult::Failed("upstream exploded".into()));
        assert_eq!(purchase.retry_attempts, 1);
        assert!(!purchase.needs_manual_review);

        manager.attempt_auto_recovery(&mut purchase);
        assert_eq!(purchase.retry_attempts, 2);
        assert!(purchase.needs_manual_review);
    }

    #[test]
    fn repeated_invalid_seller_counts_as_failure() {
        let manager = RecoveryManager::default();
        let mut purchase = rejected(vec![("i1", 10, "bad seller", ErrorCode::InvalidSeller)]);
        manager.attempt_auto_recovery(&mut purchase);

        let second = manager.attempt_auto_recovery(&mut purchase);
        assert!(matches!(second, RecoveryResult::Failed(_)));
        assert_eq!(purchase.retry_attempts, 1);
    }

    #[test]
    fn collateral_only_never_needs_review_on_first_attempt() {
        let manager = RecoveryManager::default();
        let mut purchase = rejected(vec![("i1", 3, "", ErrorCode::Unspecified)]);

        let result = manager.attempt_auto_recovery(&mut purchase);
        assert!(matches!(result, RecoveryResult::Failed(_)));
        assert!(!purchase.needs_manual_review);
    }

    #[test]
    fn recover_discards_on_success() {
        let manager = RecoveryManager::default();
        let (store, _) = stores();
        let purchase = rejected(vec![("i1", 3, "seen", ErrorCode::DuplicateReceipt)]);
        store.save(&purchase).unwrap();

        let result = manager.recover(&store, purchase).unwrap();
        assert!(result.is_success());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn correct_then_resubmit() {
        let manager = RecoveryManager::default();
        let (store, pending) = stores();
        let purchase = rejected(vec![
            ("i1", 10, "seller 10 is not approved", ErrorCode::InvalidSeller),
            ("i2", 3, "", ErrorCode::Unspecified),
        ]);
        manager.recover(&store, purchase).unwrap();
        assert_eq!(manager.review_queue(&store).unwrap().len(), 1);

        let corrected = manager.correct_seller(&store, "p1", "i1", 4).unwrap();
        assert_eq!(corrected.invalid_sellers(), Vec::<i64>::new());
        assert_eq!(corrected.error_code, ErrorCode::Unspecified);

        assert_eq!(manager.resubmit(&store, &pending, "p1").unwrap(), 2);
        assert_eq!(manager.resubmit(&store, &pending, "p1").unwrap(), 0);
        assert!(manager.review_queue(&store).unwrap().is_empty());

        let items = pending.list_pending().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].seller_id, 4);
    }

    #[test]
    fn drop_last_item_discards_purchase() {
        let manager = RecoveryManager::default();
        let (store, _) = stores();
        store
            .save(&rejected(vec![
                ("i1", 10, "bad", ErrorCode::InvalidSeller),
                ("i2", 3, "", ErrorCode::Unspecified),
            ]))
            .unwrap();

        let remaining = manager.drop_item(&store, "p1", "i1").unwrap().unwrap();
        assert_eq!(remaining.items.len(), 1);
        assert!(manager.drop_item(&store, "p1", "missing").is_err());
        assert!(manager.drop_item(&store, "p1", "i2").unwrap().is_none());
        assert!(store.get("p1").unwrap().is_none());
    }

    #[test]
    fn resubmit_eligible_skips_review_and_fresh() {
        let manager = RecoveryManager::default();
        let (store, pending) = stores();

        let mut failed = rejected(vec![("i1", 3, "boom", ErrorCode::Unknown)]);
        manager.attempt_auto_recovery(&mut failed);
        store.save(&failed).unwrap();

        let mut parked = rejected(vec![("i9", 10, "bad", ErrorCode::InvalidSeller)]);
        parked.purchase_id = "p2".into();
        manager.attempt_auto_recovery(&mut parked);
        store.save(&parked).unwrap();

        let ids = manager.resubmit_eligible(&store, &pending).unwrap();
        assert_eq!(ids, vec!["p1".to_string()]);
        assert_eq!(pending.len().unwrap(), 1);

        manager.resubmit_eligible(&store, &pending).unwrap();
        assert_eq!(pending.len().unwrap(), 1);
    }
}
