//! # Burrow Testkit
//!
//! Test utilities for Burrow.
//!
//! This crate provides:
//! - Test fixtures and database helpers
//! - Property-based test generators using proptest
//! - A model harness that checks the database against a `BTreeMap`
//! - Crash recovery harnesses over real database directories
//! - Fuzz targets for the on-disk decoders
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust,ignore
//! use burrow_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_database() {
//!     with_temp_db(|db| {
//!         db.set(b"key", b"value".to_vec(), None).unwrap();
//!         assert_eq!(db.get(b"key").unwrap(), b"value");
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod fuzz;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
