//! CLI error type.

use burrow_core::CoreError;
use burrow_storage::StorageError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for command implementations.
pub type CliResult<T> = Result<T, CliError>;

/// Errors reported by the `burrow` tool.
#[derive(Debug, Error)]
pub enum CliError {
    /// No `--path` was given.
    #[error("database path required (use --path <DIR>)")]
    MissingPath,

    /// The path holds no database.
    #[error("no database found at {}", .0.display())]
    NotFound(PathBuf),

    /// A verification pass found problems.
    #[error("verification failed: {0} problem(s) found")]
    VerificationFailed(usize),

    /// Engine error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Storage backend error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// JSON output error.
    #[error("failed to write JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Process exit code: 2 for usage errors, 1 for everything else.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::MissingPath => 2,
            _ => 1,
        }
    }
}
