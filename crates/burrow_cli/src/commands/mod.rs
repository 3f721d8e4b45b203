//! CLI command implementations.

pub mod compact;
pub mod dump_wal;
pub mod inspect;
pub mod kv;
pub mod verify;

use crate::error::{CliError, CliResult};
use burrow_core::{Config, Database, DatabaseDir};
use clap::ValueEnum;
use std::path::Path;

/// Output format for reporting commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text.
    #[default]
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Opens the database at `path`, runs `f`, then closes it.
///
/// Maintenance runs inline so the process never leaves a worker thread
/// behind. A close failure is reported only if `f` succeeded.
pub fn with_database<T>(
    path: &Path,
    create: bool,
    f: impl FnOnce(&Database) -> CliResult<T>,
) -> CliResult<T> {
    if !create && !path.exists() {
        return Err(CliError::NotFound(path.to_path_buf()));
    }
    let config = Config::new()
        .create_if_missing(create)
        .background_work(false);
    let db = Database::open_with_config(path, config)?;
    let result = f(&db);
    let closed = db.close();
    let value = result?;
    closed?;
    Ok(value)
}

/// Locks the directory at `path` for offline file inspection.
pub fn open_dir(path: &Path) -> CliResult<DatabaseDir> {
    if !path.is_dir() {
        return Err(CliError::NotFound(path.to_path_buf()));
    }
    Ok(DatabaseDir::open(path, false)?)
}

/// Renders bytes as text when they are valid UTF-8, hex otherwise.
pub fn display_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) if !text.chars().any(char::is_control) => text.to_string(),
        _ => to_hex(bytes),
    }
}

/// Lowercase hex with a `0x` prefix.
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Formats a byte count with a binary unit.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_display_as_text_or_hex() {
        assert_eq!(display_bytes(b"hello"), "hello");
        assert_eq!(display_bytes(&[0xff, 0x00]), "0xff00");
        assert_eq!(display_bytes(b"a\nb"), "0x610a62");
    }

    #[test]
    fn sizes_pick_a_unit() {
        assert_eq!(format_size(12), "12 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn missing_directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            with_database(&missing, false, |_| Ok(())),
            Err(CliError::NotFound(_))
        ));
        assert!(matches!(open_dir(&missing), Err(CliError::NotFound(_))));
    }
}
