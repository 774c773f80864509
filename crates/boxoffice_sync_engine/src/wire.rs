//! Conversions between queue records and protocol messages.

use boxoffice_core::{
    CommittedScan, ErrorCode, EventId, Millis, PaymentMethod, PendingItem, PendingScan,
    ScanStatus, StoredSoldItem,
};
use boxoffice_sync_protocol as proto;

pub(crate) fn payment_to_wire(method: PaymentMethod) -> proto::PaymentMethod {
    match method {
        PaymentMethod::Unspecified => proto::PaymentMethod::Unspecified,
        PaymentMethod::DigitalWallet => proto::PaymentMethod::DigitalWallet,
        PaymentMethod::Cash => proto::PaymentMethod::Cash,
    }
}

pub(crate) fn payment_from_wire(method: proto::PaymentMethod) -> PaymentMethod {
    match method {
        proto::PaymentMethod::Unspecified => PaymentMethod::Unspecified,
        proto::PaymentMethod::DigitalWallet => PaymentMethod::DigitalWallet,
        proto::PaymentMethod::Cash => PaymentMethod::Cash,
    }
}

pub(crate) fn error_code_from_wire(code: proto::ErrorCode) -> ErrorCode {
    match code {
        proto::ErrorCode::Unspecified => ErrorCode::Unspecified,
        proto::ErrorCode::InvalidSeller => ErrorCode::InvalidSeller,
        proto::ErrorCode::DuplicateReceipt => ErrorCode::DuplicateReceipt,
        proto::ErrorCode::Unknown => ErrorCode::Unknown,
    }
}

pub(crate) fn item_to_wire(item: &PendingItem) -> proto::SoldItem {
    proto::SoldItem {
        item_id: item.item_id.clone(),
        purchase_id: item.purchase_id.clone(),
        seller: item.seller_id,
        price: item.price,
        payment_method: payment_to_wire(item.payment_method),
        sold_time: item.timestamp,
    }
}

/// Stored form of an item the service reported as sold.
pub(crate) fn item_from_wire(event_id: &EventId, item: &proto::SoldItem) -> StoredSoldItem {
    StoredSoldItem {
        item_id: item.item_id.clone(),
        event_id: event_id.clone(),
        purchase_id: item.purchase_id.clone(),
        seller: item.seller,
        price: item.price,
        payment_method: payment_from_wire(item.payment_method),
        sold_time: item.sold_time,
        uploaded: true,
    }
}

pub(crate) fn scan_status_from_wire(reason: proto::ScanRejection) -> ScanStatus {
    match reason {
        proto::ScanRejection::Duplicate => ScanStatus::Duplicate,
        proto::ScanRejection::Invalid => ScanStatus::Invalid,
        proto::ScanRejection::Error => ScanStatus::Error,
    }
}

/// Builds the ledger entry for a scan outcome.
pub(crate) fn outcome(
    scan: &PendingScan,
    status: ScanStatus,
    was_offline: bool,
    committed_at: Millis,
) -> CommittedScan {
    CommittedScan {
        scan_id: scan.scan_id.clone(),
        ticket_id: scan.ticket_id.clone(),
        event_id: scan.event_id.clone(),
        scanned_at: scan.scanned_at,
        committed_at,
        was_offline,
        status,
        ticket_type: None,
        email: None,
        error_message: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_item_maps_to_sold_item() {
        let item = PendingItem {
            item_id: "i1".into(),
            purchase_id: "p1".into(),
            seller_id: 7,
            price: 900,
            payment_method: PaymentMethod::DigitalWallet,
            error_text: Some("timed out".into()),
            timestamp: 42,
        };

        let wire = item_to_wire(&item);
        assert_eq!(wire.seller, 7);
        assert_eq!(wire.sold_time, 42);
        assert_eq!(wire.payment_method, proto::PaymentMethod::DigitalWallet);

        let event = EventId::new("ev").unwrap();
        let stored = item_from_wire(&event, &wire);
        assert!(stored.uploaded);
        assert_eq!(stored.to_pending().seller_id, 7);
    }

    #[test]
    fn unknown_codes_stay_unknown() {
        assert_eq!(error_code_from_wire(proto::ErrorCode::Unknown), ErrorCode::Unknown);
        assert_eq!(scan_status_from_wire(proto::ScanRejection::Error), ScanStatus::Error);
    }
}
