//! Transactions with snapshot isolation.
//!
//! - **Atomicity**: a commit is one log record and one publish step
//! - **Isolation**: reads see the snapshot at the transaction's read
//!   timestamp; update transactions that read a key written after that
//!   timestamp fail to commit with `Conflict`
//! - **Durability**: the log record is appended (and synced, when
//!   configured) before the writes become visible

mod manager;
mod oracle;
mod state;

pub use manager::{CommitOutcome, TransactionManager, Visible};
pub use oracle::{fingerprint, CommitGuard, Oracle};
pub use state::{Transaction, TransactionState, WriteLimits};
