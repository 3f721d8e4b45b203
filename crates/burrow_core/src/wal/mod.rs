//! Write-ahead log for durability and crash recovery.
//!
//! Every commit is appended to the log as one `Batch` record before it
//! becomes visible. On open, log files newer than the last flush are
//! replayed into the memtable.
//!
//! ## Record Format
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! ## Recovery Policy
//!
//! Tolerated (treated as a clean end of log, then truncated away):
//!
//! - **Truncated header**: fewer than 11 bytes left
//! - **Truncated payload**: the length runs past the end of the file
//!
//! Fatal (open fails):
//!
//! - **CRC mismatch** → `ChecksumMismatch`
//! - **Invalid magic**, **unknown record type**, **future version** →
//!   `WalCorruption`
//!
//! ## Invariants
//!
//! - The log is append-only; a failed append is rolled back
//! - A batch is durable before its commit returns when `sync_writes` is on
//! - Replay is idempotent: batches at or below the flushed timestamp are
//!   skipped

mod iterator;
mod record;
mod writer;

pub use iterator::WalRecordIterator;
pub use record::{WalRecord, WalRecordType, WAL_MAGIC, WAL_VERSION};
pub use writer::{WalReplay, WalWriter};
