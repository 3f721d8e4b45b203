//! Backend error types.

use std::io;
use thiserror::Error;

/// Result type for backend operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by a [`crate::StorageBackend`].
#[derive(Debug, Error)]
pub enum StorageError {
    /// The operating system reported an I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A read asked for bytes the backend does not hold.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// Requested offset.
        offset: u64,
        /// Requested length.
        len: usize,
        /// Current backend size.
        size: u64,
    },

    /// A truncate asked to grow the backend.
    #[error("cannot truncate to {requested} bytes, backend holds {size}")]
    TruncateBeyondEnd {
        /// Requested size.
        requested: u64,
        /// Current backend size.
        size: u64,
    },
}
