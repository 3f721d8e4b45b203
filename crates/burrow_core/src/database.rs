//! Database facade and recovery.

use crate::config::Config;
use crate::dir::{DatabaseDir, StorageLayout};
use crate::error::{CoreError, CoreResult};
use crate::expiry::now_millis;
use crate::kv::KvAccess;
use crate::segment::{CompactionResult, StorageCore};
use crate::stats::{DatabaseStats, StatsSnapshot};
use crate::transaction::TransactionManager;
use crate::txn::Txn;
use crate::types::Timestamp;
use crate::wal::{WalRecord, WalWriter};
use crate::worker::BackgroundWorker;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// The main database handle.
///
/// `Database` owns the directory lock, the storage core, the log and the
/// background worker. There is no global instance: open as many
/// independent handles as needed, each on its own directory.
///
/// # Opening a Database
///
/// ```rust,ignore
/// use burrow_core::Database;
///
/// let db = Database::open("my_database")?;
/// db.set(b"greeting", b"hello".to_vec(), None)?;
/// assert_eq!(db.get(b"greeting")?, b"hello");
/// db.close()?;
/// ```
///
/// # In-Memory Databases
///
/// `Database::open_in_memory()` keeps everything on the heap; nothing
/// survives the handle.
///
/// # Transactions
///
/// ```rust,ignore
/// db.update(|txn| {
///     let n = txn.get(b"counter").map(|v| v[0]).unwrap_or(0);
///     txn.set(b"counter", vec![n + 1], None)
/// })?;
/// ```
pub struct Database {
    shared: Arc<Shared>,
    worker: Mutex<Option<BackgroundWorker>>,
}

/// State the background worker shares with the handle.
struct Shared {
    config: Config,
    core: Arc<StorageCore>,
    txns: TransactionManager,
    stats: Arc<DatabaseStats>,
    background_error: Mutex<Option<String>>,
    open: AtomicBool,
}

/// What recovery found on open.
#[derive(Debug, Default)]
struct Recovery {
    wal_files: usize,
    batches: usize,
    skipped: usize,
    truncated_bytes: u64,
    last_ts: Timestamp,
}

impl Database {
    /// Opens or creates a database in `path` with default configuration.
    ///
    /// # Errors
    ///
    /// - `DatabaseLocked` if another handle has the directory open
    /// - `InvalidFormat`, `WalCorruption`, `SegmentCorruption` or
    ///   `ChecksumMismatch` if existing files are damaged
    /// - `Io` on file system errors
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens a fresh in-memory database.
    ///
    /// # Errors
    ///
    /// Fails only if the background worker cannot be spawned.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_layout(StorageLayout::Memory, Config::default().in_memory(true))
    }

    /// Opens a database with custom configuration. With
    /// `config.in_memory` set, `path` is ignored.
    ///
    /// ```rust,ignore
    /// let config = Config::default()
    ///     .sync_writes(false)
    ///     .memtable_size(1 << 20);
    /// let db = Database::open_with_config("my_database", config)?;
    /// ```
    ///
    /// # Errors
    ///
    /// Same as [`Database::open`].
    pub fn open_with_config(path: impl AsRef<Path>, config: Config) -> CoreResult<Self> {
        let layout = if config.in_memory {
            StorageLayout::Memory
        } else {
            StorageLayout::Disk(DatabaseDir::open(path.as_ref(), config.create_if_missing)?)
        };
        Self::open_layout(layout, config)
    }

    fn open_layout(layout: StorageLayout, config: Config) -> CoreResult<Self> {
        let core = Arc::new(StorageCore::open(layout)?);
        let (wal, recovery) = Self::recover(&core, &config)?;

        let stats = Arc::new(DatabaseStats::new());
        let txns = TransactionManager::new(
            Arc::clone(&core),
            wal,
            recovery.last_ts,
            &config,
            Arc::clone(&stats),
        );

        let shared = Arc::new(Shared {
            config,
            core,
            txns,
            stats,
            background_error: Mutex::new(None),
            open: AtomicBool::new(true),
        });

        let worker = if shared.config.background_work {
            let task_shared = Arc::clone(&shared);
            Some(BackgroundWorker::start(
                "burrow-maintenance",
                shared.config.background_interval,
                move || task_shared.run_maintenance(),
            )?)
        } else {
            None
        };

        let db = Self {
            shared,
            worker: Mutex::new(worker),
        };

        let levels = db.shared.core.levels();
        info!(
            path = ?db.shared.core.layout().path(),
            segments = levels.segments.len(),
            wal_files = recovery.wal_files,
            batches = recovery.batches,
            skipped = recovery.skipped,
            truncated_bytes = recovery.truncated_bytes,
            last_ts = recovery.last_ts.as_u64(),
            "database opened"
        );
        if !levels.frozen.is_empty() {
            db.schedule_maintenance();
        }
        Ok(db)
    }

    /// Replays leftover log files into a frozen memtable and starts a
    /// fresh log.
    ///
    /// Batches at or below the manifest's flushed timestamp are already in
    /// segments and skipped. A torn record at the end of a file is cut off.
    fn recover(core: &StorageCore, config: &Config) -> CoreResult<(WalWriter, Recovery)> {
        let flushed = core.flushed_ts();
        let layout = core.layout();
        let wal_ids = layout.wal_ids()?;

        let mut recovery = Recovery {
            wal_files: wal_ids.len(),
            last_ts: flushed,
            ..Recovery::default()
        };
        for &id in &wal_ids {
            let mut wal = WalWriter::new(id, layout.open_wal(id)?, false);
            let replay = wal.replay(flushed)?;
            recovery.batches += replay.batches;
            recovery.skipped += replay.skipped;
            recovery.truncated_bytes += replay.truncated_bytes;
            recovery.last_ts = recovery.last_ts.max(replay.max_ts);
            core.apply(replay.entries);
        }

        if !core.freeze(wal_ids.clone()) {
            for &id in &wal_ids {
                layout.remove_wal(id)?;
            }
        }

        let id = core.allocate_wal_id();
        let mut wal = WalWriter::new(id, layout.open_wal(id)?, config.sync_writes);
        wal.append(&WalRecord::Checkpoint { ts: flushed })?;
        core.persist_manifest()?;

        Ok((wal, recovery))
    }

    /// Closes the database.
    ///
    /// Stops the background worker, writes the memtable to a segment,
    /// syncs, saves the manifest and releases the directory lock.
    ///
    /// # Errors
    ///
    /// - `Uninitialized` if already closed
    /// - `Io`/`Storage` if the final flush fails; the lock is released
    ///   anyway and the log still holds the data
    pub fn close(&self) -> CoreResult<()> {
        if !self.shared.open.swap(false, Ordering::SeqCst) {
            return Err(CoreError::Uninitialized);
        }

        let worker = self.worker.lock().take();
        if let Some(mut worker) = worker {
            worker.stop();
        }

        let result = self.shared.shutdown();
        self.shared.core.layout().release();

        match &result {
            Ok(()) => info!(path = ?self.shared.core.layout().path(), "database closed"),
            Err(err) => warn!(error = %err, "database closed with errors"),
        }
        result
    }

    /// Checks if the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Ensures the database is open and surfaces any background failure.
    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if !self.is_open() {
            return Err(CoreError::Uninitialized);
        }
        match self.shared.background_error.lock().take() {
            Some(message) => Err(CoreError::BackgroundError { message }),
            None => Ok(()),
        }
    }

    pub(crate) fn manager(&self) -> &TransactionManager {
        &self.shared.txns
    }

    /// Wakes the worker, or flushes inline when there is none.
    pub(crate) fn schedule_maintenance(&self) {
        match self.worker.lock().as_ref() {
            Some(worker) => worker.notify(),
            None => self.shared.run_maintenance(),
        }
    }

    /// Begins a transaction. `update` allows writes and enables conflict
    /// detection at commit.
    ///
    /// # Errors
    ///
    /// `Uninitialized` after close; `BackgroundError` if the worker failed.
    pub fn new_transaction(&self, update: bool) -> CoreResult<Txn<'_>> {
        self.ensure_open()?;
        Ok(Txn::new(self, self.shared.txns.begin(update)))
    }

    /// Runs `f` in a read-write transaction, committing if it returns
    /// `Ok` and discarding otherwise.
    ///
    /// # Errors
    ///
    /// Errors from `f`, or from the commit (including `Conflict`).
    pub fn update<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Txn<'_>) -> CoreResult<T>,
    {
        let mut txn = self.new_transaction(true)?;
        let value = f(&mut txn)?;
        txn.commit()?;
        Ok(value)
    }

    /// Runs `f` in a read-only transaction.
    ///
    /// # Errors
    ///
    /// Errors from `f`.
    pub fn view<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Txn<'_>) -> CoreResult<T>,
    {
        let mut txn = self.new_transaction(false)?;
        f(&mut txn)
    }

    /// Stores `value` under `key` in its own transaction.
    ///
    /// # Errors
    ///
    /// See [`KvAccess::set`].
    pub fn set(&self, key: &[u8], value: Vec<u8>, ttl: Option<Duration>) -> CoreResult<()> {
        self.update(|txn| txn.set(key, value, ttl))
    }

    /// Returns the live value of `key`.
    ///
    /// # Errors
    ///
    /// See [`KvAccess::get`].
    pub fn get(&self, key: &[u8]) -> CoreResult<Vec<u8>> {
        self.view(|txn| txn.get(key))
    }

    /// Deletes `key` in its own transaction.
    ///
    /// # Errors
    ///
    /// See [`KvAccess::delete`].
    pub fn delete(&self, key: &[u8]) -> CoreResult<()> {
        self.update(|txn| txn.delete(key))
    }

    /// Returns the absolute expiry of `key` in Unix milliseconds, 0 for
    /// never.
    ///
    /// # Errors
    ///
    /// See [`KvAccess::expires_at`].
    pub fn expires_at(&self, key: &[u8]) -> CoreResult<u64> {
        self.view(|txn| txn.expires_at(key))
    }

    /// Writes the memtable and every frozen memtable to segments.
    ///
    /// # Errors
    ///
    /// `Uninitialized` after close; `Io`/`Storage` if a write fails.
    pub fn flush(&self) -> CoreResult<()> {
        self.ensure_open()?;
        self.shared.txns.rotate()?;
        self.shared.flush_frozen()
    }

    /// Flushes, then merges all segments into one, dropping versions no
    /// open transaction can see. Returns `None` when there was nothing to
    /// merge.
    ///
    /// # Errors
    ///
    /// Same as [`Database::flush`].
    pub fn compact(&self) -> CoreResult<Option<CompactionResult>> {
        self.flush()?;
        self.shared.merge()
    }

    /// Flushes and fsyncs the active log file.
    ///
    /// # Errors
    ///
    /// `Uninitialized` after close; `Io`/`Storage` if the sync fails.
    pub fn sync(&self) -> CoreResult<()> {
        self.ensure_open()?;
        self.shared.txns.sync()
    }

    /// Returns a snapshot of counters and storage gauges.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        let shared = &self.shared;
        let levels = shared.core.levels();
        StatsSnapshot {
            published_ts: shared.txns.published().as_u64(),
            active_transactions: shared.txns.active_count() as u64,
            memtable_bytes: levels.active.approximate_size() as u64,
            frozen_memtables: levels.frozen.len() as u64,
            segments: levels.segments.len() as u64,
            segment_records: levels.segments.iter().map(|s| s.len() as u64).sum(),
            ..shared.stats.snapshot()
        }
    }

    /// Returns database configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// The database directory; `None` in memory.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.shared.core.layout().path()
    }
}

impl Shared {
    /// One round of background work: flush frozen memtables, then merge
    /// if enough segments piled up. Failures are kept for the next
    /// foreground call.
    fn run_maintenance(&self) {
        let result = self.flush_frozen().and_then(|()| {
            if self.core.levels().segments.len() >= self.config.merge_trigger {
                self.merge().map(|_| ())
            } else {
                Ok(())
            }
        });

        if let Err(err) = result {
            warn!(error = %err, "background maintenance failed");
            self.stats.record_error();
            *self.background_error.lock() = Some(err.to_string());
        }
    }

    fn flush_frozen(&self) -> CoreResult<()> {
        let flushed = self.core.flush_frozen()?;
        self.stats.record_flushes(flushed as u64);
        Ok(())
    }

    fn merge(&self) -> CoreResult<Option<CompactionResult>> {
        let result = self.core.merge(self.txns.low_watermark(), now_millis())?;
        if result.is_some() {
            self.stats.record_merge();
        }
        Ok(result)
    }

    /// Final flush on close. In memory there is nothing to persist.
    fn shutdown(&self) -> CoreResult<()> {
        if self.core.layout().is_memory() {
            return Ok(());
        }
        self.txns.rotate()?;
        self.flush_frozen()?;
        self.txns.sync()?;
        self.core.persist_manifest()
    }
}

impl KvAccess for Database {
    fn set(&mut self, key: &[u8], value: Vec<u8>, ttl: Option<Duration>) -> CoreResult<()> {
        Database::set(self, key, value, ttl)
    }

    fn get(&mut self, key: &[u8]) -> CoreResult<Vec<u8>> {
        Database::get(self, key)
    }

    fn delete(&mut self, key: &[u8]) -> CoreResult<()> {
        Database::delete(self, key)
    }

    fn expires_at(&mut self, key: &[u8]) -> CoreResult<u64> {
        Database::expires_at(self, key)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("is_open", &self.is_open())
            .field("path", &self.path())
            .field("published", &self.shared.txns.published())
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if self.is_open() {
            if let Err(err) = self.close() {
                warn!(error = %err, "failed to close database on drop");
            }
        }
    }
}
