//! # BoxOffice Sync Protocol
//!
//! Request and response types of the remote sales and ticketing service.
//!
//! This crate provides:
//! - Purchase upload with per-item verdicts
//! - Paged sold-item listing
//! - Scan upload and ticket lookup
//! - The CBOR body codec
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod messages;

pub use codec::{decode, encode};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    ErrorBody, ErrorCode, GetTicketRequest, ListSoldItemsRequest, ListSoldItemsResponse,
    PaymentMethod, RejectedItem, Rpc, ScanRejection, ScanVerdict, SoldItem, SubmitPurchasesRequest,
    SubmitPurchasesResponse, SubmitScanRequest, TicketRecord,
};
