//! Error types for the Burrow engine.

use std::io;
use thiserror::Error;

/// Result type for engine operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors returned by database and transaction operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The handle was never opened or has already been closed.
    #[error("database is not open")]
    Uninitialized,

    /// No visible, live version exists for the key.
    #[error("key not found")]
    KeyNotFound,

    /// A key this transaction read was written by a transaction that
    /// committed after it started.
    #[error("transaction conflict: a key read by this transaction was modified concurrently")]
    Conflict,

    /// The transaction was committed or discarded already.
    #[error("transaction has been discarded")]
    DiscardedTransaction,

    /// A write was attempted in a read-only transaction.
    #[error("cannot write in a read-only transaction")]
    ReadOnlyTransaction,

    /// Keys must contain at least one byte.
    #[error("key cannot be empty")]
    EmptyKey,

    /// The transaction's pending writes would exceed the batch limits.
    #[error("transaction too big: {count} writes, {size} bytes")]
    TransactionTooBig {
        /// Pending write count including the rejected write.
        count: usize,
        /// Pending byte size including the rejected write.
        size: u64,
    },

    /// An argument is outside its permitted range.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What was wrong.
        message: String,
    },

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] burrow_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The durability log is corrupted.
    #[error("WAL corruption: {message}")]
    WalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// A segment file is corrupted.
    #[error("segment corruption: {message}")]
    SegmentCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// Another handle holds the directory lock.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// Invalid database format or version.
    #[error("invalid database format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// The background worker failed; the database should be closed.
    #[error("background work failed: {message}")]
    BackgroundError {
        /// The underlying failure, rendered.
        message: String,
    },
}

impl CoreError {
    /// Creates a WAL corruption error.
    pub fn wal_corruption(message: impl Into<String>) -> Self {
        Self::WalCorruption {
            message: message.into(),
        }
    }

    /// Creates a segment corruption error.
    pub fn segment_corruption(message: impl Into<String>) -> Self {
        Self::SegmentCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a background error from any displayable failure.
    pub fn background(err: impl std::fmt::Display) -> Self {
        Self::BackgroundError {
            message: err.to_string(),
        }
    }

    /// Returns true for errors that leave the database unchanged and can
    /// be retried by running the transaction again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}
