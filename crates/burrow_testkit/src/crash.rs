//! Crash recovery testing for Burrow.
//!
//! A crash is simulated by copying a live database directory, minus its
//! `LOCK`, at the moment of interest. The copy is exactly what a power
//! loss would leave behind when every commit is synced, so reopening it
//! exercises log replay, torn-tail truncation and manifest recovery.
//!
//! ## Scenarios
//!
//! 1. **Committed data survives** - synced commits are replayed
//! 2. **Uncommitted data is discarded** - open transactions leave nothing
//! 3. **Torn tail** - a half-written last record is cut off
//! 4. **Crash after flush or compaction** - segments plus log replay
//!
//! ## Usage
//!
//! ```rust,ignore
//! use burrow_testkit::crash::CrashRecoveryHarness;
//!
//! let mut harness = CrashRecoveryHarness::with_temp_dir()?;
//! harness.run_all_tests();
//! assert!(harness.all_passed(), "{}", harness.summary());
//! ```

use burrow_core::{Config, CoreError, CoreResult, Database};
use burrow_storage::{StorageBackend, StorageError, StorageResult};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Description of what was tested.
    pub description: String,
    /// Keys expected after recovery.
    pub expected_keys: usize,
    /// Keys found after recovery.
    pub actual_keys: usize,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(description: &str, keys: usize) -> Self {
        Self {
            passed: true,
            description: description.to_string(),
            expected_keys: keys,
            actual_keys: keys,
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(description: &str, expected: usize, actual: usize, error: &str) -> Self {
        Self {
            passed: false,
            description: description.to_string(),
            expected_keys: expected,
            actual_keys: actual,
            error: Some(error.to_string()),
        }
    }
}

/// Shared switches for a [`CrashableBackend`], usable after the backend
/// has been handed to a writer.
#[derive(Debug)]
pub struct CrashControl {
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    crashed: AtomicBool,
    fail_on_sync: AtomicBool,
}

impl CrashControl {
    /// Crash once `bytes` more bytes have been appended.
    pub fn crash_after(&self, bytes: usize) {
        let written = self.bytes_written.load(Ordering::SeqCst);
        self.crash_after_bytes
            .store(written.saturating_add(bytes), Ordering::SeqCst);
    }

    /// Sets whether flush and sync should fail.
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.fail_on_sync.store(fail, Ordering::SeqCst);
    }

    /// Disarms every switch.
    pub fn reset(&self) {
        self.crash_after_bytes.store(usize::MAX, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
        self.fail_on_sync.store(false, Ordering::SeqCst);
    }

    /// Returns whether a simulated crash has happened.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }
}

/// A storage backend wrapper that can simulate crashes.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    control: Arc<CrashControl>,
}

impl CrashableBackend {
    /// Wraps `inner`, returning the backend and its control handle.
    pub fn new(inner: Box<dyn StorageBackend>) -> (Self, Arc<CrashControl>) {
        let control = Arc::new(CrashControl {
            crash_after_bytes: AtomicUsize::new(usize::MAX),
            bytes_written: AtomicUsize::new(0),
            crashed: AtomicBool::new(false),
            fail_on_sync: AtomicBool::new(false),
        });
        (
            Self {
                inner,
                control: Arc::clone(&control),
            },
            control,
        )
    }

    fn crash(&self, what: &str) -> StorageError {
        self.control.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(io::Error::new(
            io::ErrorKind::Other,
            format!("simulated crash during {what}"),
        ))
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let current = self.control.bytes_written.load(Ordering::SeqCst);
        let threshold = self.control.crash_after_bytes.load(Ordering::SeqCst);

        if current >= threshold {
            return Err(self.crash("write"));
        }

        // Write partial data up to the crash point.
        if current + bytes.len() > threshold {
            let partial = threshold - current;
            self.control
                .bytes_written
                .fetch_add(partial, Ordering::SeqCst);
            if partial > 0 {
                self.inner.append(&bytes[..partial])?;
            }
            return Err(self.crash("partial write"));
        }

        self.control
            .bytes_written
            .fetch_add(bytes.len(), Ordering::SeqCst);
        self.inner.append(bytes)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.control.fail_on_sync.load(Ordering::SeqCst) {
            return Err(self.crash("flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.control.fail_on_sync.load(Ordering::SeqCst) {
            return Err(self.crash("sync"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }
}

/// Copies a database directory, skipping the lock file.
///
/// # Errors
///
/// Fails on any file system error.
pub fn copy_database(from: &Path, to: &Path) -> io::Result<()> {
    if to.exists() {
        fs::remove_dir_all(to)?;
    }
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let name = entry.file_name();
        let source = entry.path();
        if source.is_dir() {
            copy_database(&source, &to.join(&name))?;
        } else if name != "LOCK" {
            fs::copy(&source, to.join(&name))?;
        }
    }
    Ok(())
}

/// Cuts `bytes` off the end of the newest log file under `path`.
///
/// # Errors
///
/// Fails if there is no log file or it cannot be truncated.
pub fn tear_newest_wal(path: &Path, bytes: u64) -> io::Result<()> {
    let newest = fs::read_dir(path)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("wal-") && n.ends_with(".log"))
        })
        .max()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no log file"))?;
    let file = fs::OpenOptions::new().write(true).open(&newest)?;
    let len = file.metadata()?.len();
    file.set_len(len.saturating_sub(bytes))
}

/// Test harness for crash recovery scenarios.
pub struct CrashRecoveryHarness {
    dir: TempDir,
    /// Results of crash recovery tests.
    pub results: Vec<CrashRecoveryResult>,
}

impl CrashRecoveryHarness {
    /// Creates a new harness with a temporary directory.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created.
    pub fn with_temp_dir() -> io::Result<Self> {
        Ok(Self {
            dir: TempDir::new()?,
            results: Vec::new(),
        })
    }

    /// Path of the live database.
    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("db")
    }

    /// Path of the crash image.
    pub fn image_path(&self) -> PathBuf {
        self.dir.path().join("image")
    }

    /// Opens a fresh database. Maintenance runs inline so nothing changes
    /// on disk behind the harness's back.
    fn open_fresh_db(&self) -> CoreResult<Database> {
        let path = self.db_path();
        if path.exists() {
            fs::remove_dir_all(&path)?;
        }
        Database::open_with_config(path, Config::new().background_work(false))
    }

    /// Captures the live database's files as they are right now.
    fn crash(&self) -> CoreResult<()> {
        copy_database(&self.db_path(), &self.image_path())?;
        Ok(())
    }

    /// Opens the crash image.
    fn recover(&self) -> CoreResult<Database> {
        Database::open_with_config(self.image_path(), Config::new().background_work(false))
    }

    fn record(
        &mut self,
        description: &str,
        expected: usize,
        scenario: impl FnOnce(&Self) -> CoreResult<usize>,
    ) -> CrashRecoveryResult {
        let result = match scenario(self) {
            Ok(found) if found == expected => CrashRecoveryResult::pass(description, found),
            Ok(found) => {
                CrashRecoveryResult::fail(description, expected, found, "unexpected key count")
            }
            Err(err) => CrashRecoveryResult::fail(description, expected, 0, &err.to_string()),
        };
        self.results.push(result.clone());
        result
    }

    /// Tests that committed data survives a crash.
    pub fn test_committed_data_survives(&mut self) -> CrashRecoveryResult {
        self.record("Committed data survives crash", 10, |h| {
            let db = h.open_fresh_db()?;
            for i in 0..10u8 {
                db.set(&[b'k', i], vec![i; 100], None)?;
            }
            h.crash()?;
            db.close()?;

            let db = h.recover()?;
            let found = count_matching(&db, (0..10u8).map(|i| (vec![b'k', i], vec![i; 100])))?;
            db.close()?;
            Ok(found)
        })
    }

    /// Tests that an open transaction leaves nothing behind.
    pub fn test_uncommitted_data_discarded(&mut self) -> CrashRecoveryResult {
        self.record("Uncommitted data is discarded", 1, |h| {
            let db = h.open_fresh_db()?;
            db.set(b"committed", b"yes".to_vec(), None)?;

            let mut pending = db.new_transaction(true)?;
            pending.set(b"pending", b"no".to_vec(), None)?;
            h.crash()?;
            drop(pending);
            db.close()?;

            let db = h.recover()?;
            let found = count_matching(&db, [(b"committed".to_vec(), b"yes".to_vec())])?;
            let leaked = db.get(b"pending").is_ok();
            db.close()?;
            Ok(if leaked { found + 1 } else { found })
        })
    }

    /// Tests that deletes are replayed.
    pub fn test_delete_survives_crash(&mut self) -> CrashRecoveryResult {
        self.record("Delete survives crash", 1, |h| {
            let db = h.open_fresh_db()?;
            db.set(b"keep", b"1".to_vec(), None)?;
            db.set(b"drop", b"2".to_vec(), None)?;
            db.delete(b"drop")?;
            h.crash()?;
            db.close()?;

            let db = h.recover()?;
            let found = count_matching(&db, [(b"keep".to_vec(), b"1".to_vec())])?;
            let resurrected = db.get(b"drop").is_ok();
            db.close()?;
            Ok(if resurrected { found + 1 } else { found })
        })
    }

    /// Tests that a half-written last record loses only that commit.
    pub fn test_torn_tail(&mut self) -> CrashRecoveryResult {
        self.record("Torn log tail loses only the last commit", 4, |h| {
            let db = h.open_fresh_db()?;
            for i in 0..5u8 {
                db.set(&[b't', i], vec![i], None)?;
            }
            h.crash()?;
            db.close()?;
            tear_newest_wal(&h.image_path(), 3)?;

            let db = h.recover()?;
            let found = count_matching(&db, (0..5u8).map(|i| (vec![b't', i], vec![i])))?;
            let last_lost = matches!(db.get(&[b't', 4]), Err(CoreError::KeyNotFound));
            // The log is usable again after recovery.
            db.set(b"after", b"x".to_vec(), None)?;
            db.close()?;
            Ok(if last_lost { found } else { found + 100 })
        })
    }

    /// Tests recovery from segments plus a log written after the flush.
    pub fn test_crash_after_flush(&mut self) -> CrashRecoveryResult {
        self.record("Crash after flush replays only newer commits", 20, |h| {
            let db = h.open_fresh_db()?;
            for i in 0..10u8 {
                db.set(&[b'f', i], vec![i], None)?;
            }
            db.flush()?;
            for i in 10..20u8 {
                db.set(&[b'f', i], vec![i], None)?;
            }
            h.crash()?;
            db.close()?;

            let db = h.recover()?;
            let found = count_matching(&db, (0..20u8).map(|i| (vec![b'f', i], vec![i])))?;
            db.close()?;
            Ok(found)
        })
    }

    /// Tests recovery after segments were merged.
    pub fn test_crash_after_compaction(&mut self) -> CrashRecoveryResult {
        self.record("Crash after compaction", 5, |h| {
            let db = h.open_fresh_db()?;
            for round in 0..3u8 {
                for i in 0..5u8 {
                    db.set(&[b'c', i], vec![round, i], None)?;
                }
                db.flush()?;
            }
            db.compact()?;
            db.set(&[b'c', 0], vec![9, 0], None)?;
            h.crash()?;
            db.close()?;

            let db = h.recover()?;
            let expected = (0..5u8).map(|i| {
                let round = if i == 0 { 9 } else { 2 };
                (vec![b'c', i], vec![round, i])
            });
            let found = count_matching(&db, expected)?;
            db.close()?;
            Ok(found)
        })
    }

    /// Tests that commit timestamps keep increasing after recovery.
    pub fn test_timestamps_resume(&mut self) -> CrashRecoveryResult {
        self.record("Timestamps resume after recovery", 1, |h| {
            let db = h.open_fresh_db()?;
            for i in 0..3u8 {
                db.set(b"ts", vec![i], None)?;
            }
            let before = db.stats().published_ts;
            h.crash()?;
            db.close()?;

            let db = h.recover()?;
            let recovered = db.stats().published_ts;
            db.set(b"ts", vec![9], None)?;
            let after = db.stats().published_ts;
            db.close()?;
            Ok(usize::from(recovered >= before && after > recovered))
        })
    }

    /// Runs all crash recovery tests.
    pub fn run_all_tests(&mut self) -> Vec<CrashRecoveryResult> {
        self.results.clear();

        self.test_committed_data_survives();
        self.test_uncommitted_data_discarded();
        self.test_delete_survives_crash();
        self.test_torn_tail();
        self.test_crash_after_flush();
        self.test_crash_after_compaction();
        self.test_timestamps_resume();

        self.results.clone()
    }

    /// Returns a summary of test results.
    pub fn summary(&self) -> String {
        let passed = self.results.iter().filter(|r| r.passed).count();
        let mut summary = format!(
            "\n=== Crash Recovery Test Summary ===\nPassed: {}/{}\n\n",
            passed,
            self.results.len()
        );

        for result in &self.results {
            let status = if result.passed { "PASS" } else { "FAIL" };
            summary.push_str(&format!(
                "{} {}\n  Expected: {} keys, Actual: {} keys\n",
                status, result.description, result.expected_keys, result.actual_keys
            ));
            if let Some(ref error) = result.error {
                summary.push_str(&format!("  Error: {error}\n"));
            }
        }

        summary
    }

    /// Returns whether all tests passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }
}

fn count_matching(
    db: &Database,
    expected: impl IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
) -> CoreResult<usize> {
    let mut found = 0;
    for (key, value) in expected {
        match db.get(&key) {
            Ok(actual) if actual == value => found += 1,
            Ok(_) | Err(CoreError::KeyNotFound) => {}
            Err(err) => return Err(err),
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_core::wal::WalWriter;
    use burrow_core::{Entry, Timestamp};
    use burrow_storage::InMemoryBackend;

    #[test]
    fn test_crashable_backend_normal_operation() {
        let (mut backend, control) = CrashableBackend::new(Box::new(InMemoryBackend::new()));

        let data = b"test data";
        let offset = backend.append(data).unwrap();
        backend.flush().unwrap();

        assert_eq!(backend.read_at(offset, data.len()).unwrap(), data);
        assert!(!control.has_crashed());
    }

    #[test]
    fn test_crashable_backend_crash_on_write() {
        let (mut backend, control) = CrashableBackend::new(Box::new(InMemoryBackend::new()));
        control.crash_after(10);

        backend.append(&[1u8; 5]).unwrap();
        assert!(backend.append(&[2u8; 10]).is_err());
        assert!(control.has_crashed());
        assert_eq!(backend.size().unwrap(), 10);
    }

    #[test]
    fn test_crashable_backend_crash_on_sync() {
        let (mut backend, control) = CrashableBackend::new(Box::new(InMemoryBackend::new()));
        control.set_fail_on_sync(true);

        assert!(backend.sync().is_err());
        assert!(control.has_crashed());

        control.reset();
        backend.sync().unwrap();
    }

    #[test]
    fn test_partial_log_append_is_rolled_back() {
        let (backend, control) = CrashableBackend::new(Box::new(InMemoryBackend::new()));
        let mut wal = WalWriter::new(1, Box::new(backend), true);
        let entry = |key: &[u8]| Entry::put(key.to_vec(), b"value".to_vec(), 0, 0);

        wal.append_batch(Timestamp::new(1), &[entry(b"a")]).unwrap();
        let good = wal.size().unwrap();

        control.crash_after(7);
        assert!(wal.append_batch(Timestamp::new(2), &[entry(b"b")]).is_err());
        assert_eq!(wal.size().unwrap(), good);

        control.reset();
        wal.append_batch(Timestamp::new(3), &[entry(b"c")]).unwrap();
        let replay = wal.replay(Timestamp::ZERO).unwrap();
        assert_eq!(replay.batches, 2);
        assert_eq!(replay.max_ts, Timestamp::new(3));
    }

    #[test]
    fn test_copy_skips_lock() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("db")).unwrap();
        copy_database(&dir.path().join("db"), &dir.path().join("copy")).unwrap();
        assert!(!dir.path().join("copy/LOCK").exists());
        assert!(dir.path().join("copy/MANIFEST").exists());
        db.close().unwrap();
    }

    #[test]
    fn test_all_crash_recovery_scenarios() {
        let mut harness = CrashRecoveryHarness::with_temp_dir().unwrap();
        harness.run_all_tests();
        assert!(harness.all_passed(), "{}", harness.summary());
        assert_eq!(harness.results.len(), 7);
    }
}
