//! Transaction manager.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::expiry::{is_expired, now_millis};
use crate::segment::StorageCore;
use crate::stats::DatabaseStats;
use crate::transaction::oracle::{fingerprint, Oracle};
use crate::transaction::state::{validate_key, Transaction, WriteLimits};
use crate::types::{Entry, Mutation, Timestamp};
use crate::wal::{WalRecord, WalWriter};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// A live value as seen by one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visible {
    /// The value bytes.
    pub value: Vec<u8>,
    /// Absolute expiry in Unix milliseconds, 0 for never.
    pub expires_at: u64,
}

/// What a commit did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitOutcome {
    /// Assigned timestamp, `None` for a transaction with no writes.
    pub commit_ts: Option<Timestamp>,
    /// Whether the commit filled the memtable and froze it.
    pub froze: bool,
}

/// The log file taking appends. Guarded by the write lock.
struct LogState {
    wal: WalWriter,
}

/// Runs transactions against the storage core.
///
/// - Snapshot reads at the oracle's published timestamp
/// - First-committer-wins conflict detection for update transactions
/// - One log record per commit, appended before the writes become visible
///
/// ## Commit ordering
///
/// The commit mutex (inside the [`Oracle`]) is held for the conflict check
/// and timestamp assignment. The write lock is taken before the commit
/// mutex is released, so writes are logged and published in timestamp
/// order while the next committer already runs its conflict check.
pub struct TransactionManager {
    core: Arc<StorageCore>,
    oracle: Oracle,
    writer: Mutex<LogState>,
    limits: WriteLimits,
    memtable_size: usize,
    sync_writes: bool,
    stats: Arc<DatabaseStats>,
}

impl TransactionManager {
    /// Creates a manager whose next commit follows `last_ts`, appending to
    /// `wal`.
    pub fn new(
        core: Arc<StorageCore>,
        wal: WalWriter,
        last_ts: Timestamp,
        config: &Config,
        stats: Arc<DatabaseStats>,
    ) -> Self {
        Self {
            core,
            oracle: Oracle::new(last_ts),
            writer: Mutex::new(LogState { wal }),
            limits: WriteLimits::from(config),
            memtable_size: config.memtable_size,
            sync_writes: config.sync_writes,
            stats,
        }
    }

    /// Begins a transaction reading at the latest published timestamp.
    pub fn begin(&self, update: bool) -> Transaction {
        self.stats.record_transaction_start();
        Transaction::new(self.oracle.begin(update), update)
    }

    /// Buffers a write in `txn`.
    ///
    /// # Errors
    ///
    /// See [`Transaction::set`].
    pub fn set(
        &self,
        txn: &mut Transaction,
        key: &[u8],
        value: Vec<u8>,
        expires_at: u64,
    ) -> CoreResult<()> {
        txn.set(key, value, expires_at, &self.limits)
    }

    /// Buffers a delete in `txn`.
    ///
    /// # Errors
    ///
    /// See [`Transaction::delete`].
    pub fn delete(&self, txn: &mut Transaction, key: &[u8]) -> CoreResult<()> {
        txn.delete(key, &self.limits)
    }

    /// Reads `key` as `txn` sees it.
    ///
    /// The transaction's own pending write wins. Otherwise the newest
    /// version at or below the read timestamp is used. Tombstones and
    /// expired values read as `KeyNotFound`.
    ///
    /// # Errors
    ///
    /// - `DiscardedTransaction` after commit or discard
    /// - `EmptyKey` for an empty key
    /// - `KeyNotFound` when no live version is visible
    /// - storage errors from segment reads
    pub fn get(&self, txn: &mut Transaction, key: &[u8]) -> CoreResult<Visible> {
        txn.ensure_active()?;
        validate_key(key, &self.limits)?;
        let now_ms = now_millis();

        if let Some(pending) = txn.pending(key) {
            return match pending {
                Mutation::Put { value, expires_at } if !is_expired(*expires_at, now_ms) => {
                    Ok(Visible {
                        value: value.clone(),
                        expires_at: *expires_at,
                    })
                }
                _ => Err(CoreError::KeyNotFound),
            };
        }

        txn.record_read(key);
        let entry = self.core.get(key, txn.read_ts())?;
        match entry {
            Some(Entry {
                value,
                expires_at,
                tombstone: false,
                ..
            }) if !is_expired(expires_at, now_ms) => {
                self.stats.record_read(value.len() as u64);
                Ok(Visible { value, expires_at })
            }
            _ => Err(CoreError::KeyNotFound),
        }
    }

    /// Commits `txn`.
    ///
    /// On success the writes are durable (subject to `sync_writes`) and
    /// visible to transactions that begin afterwards. The transaction is
    /// finished either way.
    ///
    /// # Errors
    ///
    /// - `DiscardedTransaction` if already finished
    /// - `Conflict` if a key it read was committed after its read
    ///   timestamp; nothing is applied
    /// - `Storage`/`Io` if the log append fails; nothing is published
    pub fn commit(&self, txn: &mut Transaction) -> CoreResult<CommitOutcome> {
        txn.ensure_active()?;
        let result = self.commit_inner(txn);
        self.oracle.end(txn.read_ts(), txn.is_update());

        match &result {
            Ok(_) => {
                txn.mark_committed();
                self.stats.record_transaction_commit();
            }
            Err(err) => {
                txn.mark_discarded();
                if matches!(err, CoreError::Conflict) {
                    self.stats.record_conflict();
                } else {
                    self.stats.record_error();
                }
                self.stats.record_transaction_discard();
            }
        }
        result
    }

    fn commit_inner(&self, txn: &mut Transaction) -> CoreResult<CommitOutcome> {
        if txn.write_count() == 0 {
            return Ok(CommitOutcome::default());
        }

        let reads = txn.read_fingerprints();
        let writes = txn.take_writes();
        let write_set: HashSet<u64> = writes.keys().map(|key| fingerprint(key)).collect();

        let mut guard = self.oracle.lock_commit();
        guard.check(txn.read_ts(), &reads)?;
        let commit_ts = guard.assign(write_set);
        let mut log = self.writer.lock();
        drop(guard);

        let entries: Vec<Entry> = writes
            .into_iter()
            .map(|(key, mutation)| mutation.into_entry(key, commit_ts.as_u64()))
            .collect();
        log.wal.append_batch(commit_ts, &entries)?;

        for entry in &entries {
            if entry.tombstone {
                self.stats.record_delete();
            } else {
                self.stats.record_write(entry.value.len() as u64);
            }
        }
        self.core.apply(entries);
        self.oracle.publish(commit_ts);

        let froze = if self.core.active_size() >= self.memtable_size {
            // The commit is already durable and visible; a failed rotation
            // is retried by the next commit.
            self.rotate_locked(&mut log).unwrap_or_else(|err| {
                warn!(error = %err, "failed to rotate WAL");
                false
            })
        } else {
            false
        };

        Ok(CommitOutcome {
            commit_ts: Some(commit_ts),
            froze,
        })
    }

    /// Finishes `txn` without committing. Idempotent.
    pub fn discard(&self, txn: &mut Transaction) {
        if txn.is_active() {
            self.oracle.end(txn.read_ts(), txn.is_update());
            txn.mark_discarded();
            self.stats.record_transaction_discard();
        }
    }

    /// Freezes the active memtable and starts a new log file, if the
    /// memtable holds anything.
    ///
    /// # Errors
    ///
    /// Fails if the old log cannot be synced or the new one created.
    pub fn rotate(&self) -> CoreResult<bool> {
        let mut log = self.writer.lock();
        self.rotate_locked(&mut log)
    }

    fn rotate_locked(&self, log: &mut MutexGuard<'_, LogState>) -> CoreResult<bool> {
        if self.core.levels().active.is_empty() {
            return Ok(false);
        }

        log.wal.sync()?;
        let id = self.core.allocate_wal_id();
        let mut wal = WalWriter::new(id, self.core.layout().open_wal(id)?, self.sync_writes);
        wal.append(&WalRecord::Checkpoint {
            ts: self.core.flushed_ts(),
        })?;

        let old = std::mem::replace(&mut log.wal, wal);
        self.core.freeze(vec![old.id()]);
        self.stats.record_rotation();
        debug!(old = old.id(), new = id, "rotated WAL");
        Ok(true)
    }

    /// Flushes and fsyncs the active log file.
    ///
    /// # Errors
    ///
    /// Fails if the sync fails.
    pub fn sync(&self) -> CoreResult<()> {
        self.writer.lock().wal.sync()
    }

    /// Id of the log file taking appends.
    #[must_use]
    pub fn wal_id(&self) -> u64 {
        self.writer.lock().wal.id()
    }

    /// Highest visible commit timestamp.
    #[must_use]
    pub fn published(&self) -> Timestamp {
        self.oracle.published()
    }

    /// See [`Oracle::low_watermark`].
    #[must_use]
    pub fn low_watermark(&self) -> Timestamp {
        self.oracle.low_watermark()
    }

    /// Returns the number of active transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.oracle.active_count()
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("published", &self.published())
            .field("active_count", &self.active_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dir::StorageLayout;
    use burrow_storage::InMemoryBackend;

    fn create_manager_with(config: &Config) -> TransactionManager {
        let core = Arc::new(StorageCore::open(StorageLayout::Memory).unwrap());
        let wal = WalWriter::new(core.allocate_wal_id(), Box::new(InMemoryBackend::new()), false);
        TransactionManager::new(
            core,
            wal,
            Timestamp::ZERO,
            config,
            Arc::new(DatabaseStats::new()),
        )
    }

    fn create_manager() -> TransactionManager {
        create_manager_with(&Config::default())
    }

    fn commit_set(tm: &TransactionManager, key: &[u8], value: &[u8]) -> Timestamp {
        let mut txn = tm.begin(true);
        tm.set(&mut txn, key, value.to_vec(), 0).unwrap();
        tm.commit(&mut txn).unwrap().commit_ts.unwrap()
    }

    #[test]
    fn begin_registers_reader() {
        let tm = create_manager();
        let mut txn = tm.begin(false);
        assert!(txn.is_active());
        assert_eq!(tm.active_count(), 1);

        tm.discard(&mut txn);
        tm.discard(&mut txn);
        assert_eq!(tm.active_count(), 0);
    }

    #[test]
    fn commit_empty_transaction() {
        let tm = create_manager();
        let mut txn = tm.begin(true);
        let outcome = tm.commit(&mut txn).unwrap();
        assert_eq!(outcome.commit_ts, None);
        assert!(!txn.is_active());
        assert_eq!(tm.published(), Timestamp::ZERO);
        assert_eq!(tm.active_count(), 0);
    }

    #[test]
    fn set_and_get_in_transaction() {
        let tm = create_manager();
        let mut txn = tm.begin(true);
        tm.set(&mut txn, b"k", vec![1, 2, 3], 0).unwrap();

        // Sees its own uncommitted write.
        assert_eq!(tm.get(&mut txn, b"k").unwrap().value, vec![1, 2, 3]);

        // Others do not.
        let mut other = tm.begin(false);
        assert!(matches!(tm.get(&mut other, b"k"), Err(CoreError::KeyNotFound)));
    }

    #[test]
    fn pending_delete_hides_committed_value() {
        let tm = create_manager();
        commit_set(&tm, b"k", b"v");

        let mut txn = tm.begin(true);
        tm.delete(&mut txn, b"k").unwrap();
        assert!(matches!(tm.get(&mut txn, b"k"), Err(CoreError::KeyNotFound)));
    }

    #[test]
    fn expired_pending_write_is_not_found() {
        let tm = create_manager();
        let mut txn = tm.begin(true);
        tm.set(&mut txn, b"k", b"v".to_vec(), 1).unwrap();
        assert!(matches!(tm.get(&mut txn, b"k"), Err(CoreError::KeyNotFound)));
    }

    #[test]
    fn committed_data_visible_to_new_transaction() {
        let tm = create_manager();
        let ts = commit_set(&tm, b"k", b"v");
        assert_eq!(ts, Timestamp::new(1));
        assert_eq!(tm.published(), ts);

        let mut txn = tm.begin(false);
        assert_eq!(tm.get(&mut txn, b"k").unwrap().value, b"v");
    }

    #[test]
    fn snapshot_ignores_later_commits() {
        let tm = create_manager();
        commit_set(&tm, b"k", b"old");

        let mut reader = tm.begin(false);
        commit_set(&tm, b"k", b"new");

        assert_eq!(tm.get(&mut reader, b"k").unwrap().value, b"old");
    }

    #[test]
    fn second_committer_conflicts() {
        let tm = create_manager();
        commit_set(&tm, b"k", b"0");

        let mut t1 = tm.begin(true);
        let mut t2 = tm.begin(true);
        tm.get(&mut t1, b"k").unwrap();
        tm.get(&mut t2, b"k").unwrap();
        tm.set(&mut t1, b"k", b"1".to_vec(), 0).unwrap();
        tm.set(&mut t2, b"k", b"2".to_vec(), 0).unwrap();

        tm.commit(&mut t1).unwrap();
        assert!(matches!(tm.commit(&mut t2), Err(CoreError::Conflict)));
        assert!(matches!(
            tm.get(&mut t2, b"k"),
            Err(CoreError::DiscardedTransaction)
        ));

        let mut check = tm.begin(false);
        assert_eq!(tm.get(&mut check, b"k").unwrap().value, b"1");
        assert_eq!(tm.active_count(), 1);
    }

    #[test]
    fn blind_writes_do_not_conflict() {
        let tm = create_manager();
        let mut t1 = tm.begin(true);
        let mut t2 = tm.begin(true);
        tm.set(&mut t1, b"k", b"1".to_vec(), 0).unwrap();
        tm.set(&mut t2, b"k", b"2".to_vec(), 0).unwrap();

        tm.commit(&mut t1).unwrap();
        tm.commit(&mut t2).unwrap();

        let mut check = tm.begin(false);
        assert_eq!(tm.get(&mut check, b"k").unwrap().value, b"2");
    }

    #[test]
    fn read_only_transactions_never_conflict() {
        let tm = create_manager();
        let mut reader = tm.begin(false);
        assert!(tm.get(&mut reader, b"k").is_err());
        commit_set(&tm, b"k", b"v");

        let outcome = tm.commit(&mut reader).unwrap();
        assert_eq!(outcome.commit_ts, None);
    }

    #[test]
    fn full_memtable_rotates_log() {
        let config = Config::default().memtable_size(64);
        let tm = create_manager_with(&config);
        let first_wal = tm.wal_id();

        let mut txn = tm.begin(true);
        tm.set(&mut txn, b"k", vec![0; 100], 0).unwrap();
        let outcome = tm.commit(&mut txn).unwrap();

        assert!(outcome.froze);
        assert_ne!(tm.wal_id(), first_wal);
        let levels = tm.core.levels();
        assert!(levels.active.is_empty());
        assert_eq!(levels.frozen.len(), 1);
        assert_eq!(levels.frozen[0].wal_ids, vec![first_wal]);

        // Reads still find the frozen version.
        let mut reader = tm.begin(false);
        assert_eq!(tm.get(&mut reader, b"k").unwrap().value.len(), 100);
    }

    #[test]
    fn rotate_skips_empty_memtable() {
        let tm = create_manager();
        assert!(!tm.rotate().unwrap());
        commit_set(&tm, b"k", b"v");
        assert!(tm.rotate().unwrap());
    }

    #[test]
    fn empty_key_is_rejected() {
        let tm = create_manager();
        let mut txn = tm.begin(true);
        assert!(matches!(tm.get(&mut txn, b""), Err(CoreError::EmptyKey)));
        assert!(matches!(
            tm.set(&mut txn, b"", vec![], 0),
            Err(CoreError::EmptyKey)
        ));
    }
}
