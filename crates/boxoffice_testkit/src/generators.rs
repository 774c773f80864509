//! Property-based test generators using proptest.
//!
//! Provides strategies for generating queue records and journal operation
//! sequences.

use boxoffice_core::{EventId, NewSale, PaymentMethod, PendingItem, PendingScan};
use proptest::prelude::*;

/// Strategy for generating valid event ids.
pub fn event_id_strategy() -> impl Strategy<Value = EventId> {
    prop::string::string_regex("[a-z][a-z0-9_-]{0,23}")
        .expect("Invalid regex")
        .prop_filter_map("Event id must be valid", |s| EventId::new(s).ok())
}

/// Strategy for generating payment methods.
pub fn payment_method_strategy() -> impl Strategy<Value = PaymentMethod> {
    prop_oneof![
        Just(PaymentMethod::Unspecified),
        Just(PaymentMethod::DigitalWallet),
        Just(PaymentMethod::Cash),
    ]
}

/// Strategy for generating optional retry annotations.
pub fn error_text_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of("[a-z ]{1,30}")
}

/// Strategy for generating a pending item with the given id.
pub fn pending_item_strategy(item_id: String) -> impl Strategy<Value = PendingItem> {
    (
        "[A-Z0-9]{4}",
        1i64..500,
        0i64..100_000,
        payment_method_strategy(),
        error_text_strategy(),
        0u64..(1u64 << 48),
    )
        .prop_map(
            move |(purchase_id, seller_id, price, payment_method, error_text, timestamp)| {
                PendingItem {
                    item_id: item_id.clone(),
                    purchase_id,
                    seller_id,
                    price,
                    payment_method,
                    error_text,
                    timestamp,
                }
            },
        )
}

/// Strategy for generating up to `max` pending items with distinct ids.
pub fn pending_items_strategy(max: usize) -> impl Strategy<Value = Vec<PendingItem>> {
    (0..=max).prop_flat_map(|len| {
        (0..len)
            .map(|i| pending_item_strategy(format!("item-{i:04}")))
            .collect::<Vec<_>>()
    })
}

/// Strategy for generating a pending scan for `event_id`.
pub fn pending_scan_strategy(event_id: EventId) -> impl Strategy<Value = PendingScan> {
    ("[0-9A-Z]{26}", "T-[0-9]{1,6}", 0u64..(1u64 << 48)).prop_map(
        move |(scan_id, ticket_id, scanned_at)| PendingScan {
            scan_id,
            ticket_id,
            event_id: event_id.clone(),
            scanned_at,
            error_text: None,
        },
    )
}

/// Strategy for generating the sales of one purchase.
pub fn sales_strategy() -> impl Strategy<Value = Vec<NewSale>> {
    prop::collection::vec(
        (1i64..500, 0i64..100_000, payment_method_strategy())
            .prop_map(|(seller, price, method)| NewSale::new(seller, price, method)),
        1..6,
    )
}

/// An operation on a journal of pending items.
#[derive(Debug, Clone)]
pub enum JournalOp {
    /// Append an item with this id suffix.
    Append(u8),
    /// Remove the item with this id suffix.
    Remove(u8),
    /// Set or clear the retry annotation of the item with this id suffix.
    Annotate(u8, Option<String>),
}

impl JournalOp {
    /// Returns the item id the operation targets.
    pub fn item_id(&self) -> String {
        let n = match self {
            JournalOp::Append(n) | JournalOp::Remove(n) | JournalOp::Annotate(n, _) => n,
        };
        format!("item-{n:03}")
    }
}

/// Strategy for generating journal operations over a small id space, so
/// removes and annotations often hit existing items.
pub fn journal_op_strategy() -> impl Strategy<Value = JournalOp> {
    prop_oneof![
        3 => (0u8..16).prop_map(JournalOp::Append),
        2 => (0u8..16).prop_map(JournalOp::Remove),
        1 => ((0u8..16), error_text_strategy()).prop_map(|(n, t)| JournalOp::Annotate(n, t)),
    ]
}

/// Strategy for generating operation sequences.
pub fn journal_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<JournalOp>> {
    prop::collection::vec(journal_op_strategy(), 0..max_len)
}

/// Builds the item appended by [`JournalOp::Append`].
pub fn item_for(op: &JournalOp) -> PendingItem {
    PendingItem {
        item_id: op.item_id(),
        purchase_id: "P-1".into(),
        seller_id: 3,
        price: 500,
        payment_method: PaymentMethod::Cash,
        error_text: None,
        timestamp: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_item_ids_are_distinct(items in pending_items_strategy(20)) {
            let mut ids: Vec<_> = items.iter().map(|i| i.item_id.clone()).collect();
            ids.sort();
            ids.dedup();
            prop_assert_eq!(ids.len(), items.len());
        }

        #[test]
        fn generated_event_ids_are_valid(id in event_id_strategy()) {
            prop_assert!(EventId::new(id.as_str()).is_ok());
        }
    }
}
