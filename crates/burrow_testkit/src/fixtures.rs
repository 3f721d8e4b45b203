//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases
//! and common test scenarios.

use burrow_core::{Config, Database};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    config: Config,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Creates a new in-memory test database.
    pub fn memory() -> Self {
        Self::memory_with_config(Config::new())
    }

    /// Creates an in-memory test database with `config`.
    pub fn memory_with_config(config: Config) -> Self {
        let config = config.in_memory(true);
        Self {
            db: Database::open_with_config("", config.clone())
                .expect("Failed to open in-memory database"),
            config,
            temp_dir: None,
        }
    }

    /// Creates a new file-based test database.
    ///
    /// Log syncing is off to keep tests fast; every write still reaches
    /// the file before the commit returns.
    pub fn file() -> Self {
        Self::file_with_config(Config::new().sync_writes(false))
    }

    /// Creates a file-based test database with `config`.
    pub fn file_with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open_with_config(temp_dir.path().join("db"), config.clone())
            .expect("Failed to open file database");
        Self {
            db,
            config,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the database path if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|d| d.path().join("db"))
    }

    /// Closes and reopens a file-based database with the same config.
    ///
    /// # Panics
    ///
    /// Panics for in-memory databases, which do not survive a close.
    #[must_use]
    pub fn reopen(self) -> Self {
        let path = self.path().expect("Only file databases can be reopened");
        self.db.close().expect("Failed to close database");
        let db = Database::open_with_config(&path, self.config.clone())
            .expect("Failed to reopen database");
        Self { db, ..self }
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory database.
///
/// # Example
///
/// ```rust,ignore
/// use burrow_testkit::with_temp_db;
///
/// #[test]
/// fn my_test() {
///     with_temp_db(|db| {
///         db.set(b"k", b"v".to_vec(), None).unwrap();
///     });
/// }
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Runs a test with a temporary file-based database.
pub fn with_file_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database, &Path) -> R,
{
    let test_db = TestDatabase::file();
    let path = test_db.path().expect("File database should have a path");
    f(&test_db.db, &path)
}

/// Key used by the scenarios for index `i`.
pub fn key(i: usize) -> Vec<u8> {
    format!("key-{i:06}").into_bytes()
}

/// Value used by the scenarios for index `i`.
pub fn value(i: usize) -> Vec<u8> {
    format!("value-{i}").into_bytes()
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates a database holding `count` keys, one transaction each.
    pub fn populated_database(count: usize) -> TestDatabase {
        let test_db = TestDatabase::memory();
        for i in 0..count {
            test_db
                .set(&key(i), value(i), None)
                .expect("Failed to set key");
        }
        test_db
    }

    /// Creates a file database whose data is spread over `segments`
    /// segments of `per_segment` keys each. Later segments overwrite the
    /// same keys.
    pub fn layered_database(segments: usize, per_segment: usize) -> TestDatabase {
        let test_db =
            TestDatabase::file_with_config(Config::new().sync_writes(false).background_work(false));
        for round in 0..segments {
            test_db
                .update(|txn| {
                    for i in 0..per_segment {
                        txn.set(&key(i), format!("round-{round}").into_bytes(), None)?;
                    }
                    Ok(())
                })
                .expect("Failed to write round");
            test_db.flush().expect("Failed to flush");
        }
        test_db
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_database() {
        let test_db = TestDatabase::memory();
        assert!(test_db.path().is_none());
        assert!(test_db.is_open());
    }

    #[test]
    fn test_with_temp_db() {
        with_temp_db(|db| {
            db.set(b"k", b"v".to_vec(), None).unwrap();
            assert_eq!(db.get(b"k").unwrap(), b"v");
        });
    }

    #[test]
    fn test_reopen_keeps_data() {
        let test_db = TestDatabase::file();
        test_db.set(b"k", b"v".to_vec(), None).unwrap();
        let test_db = test_db.reopen();
        assert_eq!(test_db.get(b"k").unwrap(), b"v");
    }

    #[test]
    fn test_populated_scenario() {
        let test_db = scenarios::populated_database(10);
        assert_eq!(test_db.get(&key(9)).unwrap(), value(9));
        assert_eq!(test_db.stats().transactions_committed, 10);
    }

    #[test]
    fn test_layered_scenario() {
        let test_db = scenarios::layered_database(3, 5);
        assert_eq!(test_db.stats().segments, 3);
        assert_eq!(test_db.get(&key(4)).unwrap(), b"round-2");
    }
}
