//! # Burrow Core
//!
//! Embedded, transactional key-value engine.
//!
//! This crate provides:
//! - A durability log replayed on open
//! - Versioned storage in memtables and immutable sorted segments
//! - Snapshot-isolated transactions with first-committer-wins conflicts
//! - Per-key expiry
//! - Background flush and merge
//!
//! ```rust,ignore
//! use burrow_core::Database;
//! use std::time::Duration;
//!
//! let db = Database::open("data")?;
//! db.set(b"session", b"token".to_vec(), Some(Duration::from_secs(60)))?;
//!
//! let mut txn = db.new_transaction(true)?;
//! let token = txn.get(b"session")?;
//! txn.set(b"last-seen", token, None)?;
//! txn.commit()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod database;
mod dir;
mod encoding;
mod error;
mod expiry;
mod kv;
mod manifest;
mod stats;
mod txn;
mod types;
mod worker;

pub mod segment;
pub mod transaction;
pub mod wal;

pub use config::Config;
pub use database::Database;
pub use dir::{DatabaseDir, StorageLayout};
pub use error::{CoreError, CoreResult};
pub use expiry::{expires_at_from_ttl, is_expired, now_millis, ttl_from_millis};
pub use kv::KvAccess;
pub use manifest::{Manifest, MANIFEST_MAGIC, MANIFEST_VERSION};
pub use stats::{DatabaseStats, StatsSnapshot};
pub use txn::Txn;
pub use types::{Entry, Mutation, Timestamp};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
