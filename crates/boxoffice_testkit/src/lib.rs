//! # BoxOffice Testkit
//!
//! Test utilities for the BoxOffice offline queue.
//!
//! This crate provides:
//! - Crash simulation for file-backed journals
//! - Data directory, queue and legacy-file fixtures
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use boxoffice_testkit::prelude::*;
//!
//! #[test]
//! fn purchase_is_queued() {
//!     let queue = memory_queue("summer-fest");
//!     queue.record_purchase(&[sale(3, 500)]).unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
