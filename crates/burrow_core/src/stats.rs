//! Database statistics.
//!
//! ```rust,ignore
//! use burrow_core::Database;
//!
//! let db = Database::open_in_memory()?;
//! db.set(b"k", b"v".to_vec(), None)?;
//!
//! let stats = db.stats();
//! println!("writes: {}", stats.writes);
//! println!("segments: {}", stats.segments);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Operation counters.
///
/// All counters are atomic and can be read while operations are in
/// progress. They only ever increase.
#[derive(Debug, Default)]
pub struct DatabaseStats {
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    bytes_written: AtomicU64,
    bytes_read: AtomicU64,

    transactions_started: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_discarded: AtomicU64,
    conflicts: AtomicU64,

    wal_rotations: AtomicU64,
    flushes: AtomicU64,
    merges: AtomicU64,

    errors: AtomicU64,
}

impl DatabaseStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_read(&self, bytes: u64) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self, bytes: u64) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_start(&self) {
        self.transactions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_discard(&self) {
        self.transactions_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rotation(&self) {
        self.wal_rotations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_flushes(&self, count: u64) {
        self.flushes.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_merge(&self) {
        self.merges.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the total number of successful reads.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Returns the total number of committed puts.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Returns the total number of committed deletes.
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions committed.
    pub fn transactions_committed(&self) -> u64 {
        self.transactions_committed.load(Ordering::Relaxed)
    }

    /// Returns the number of commits rejected with `Conflict`.
    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of the counters. Storage gauges are left at
    /// zero; [`crate::Database::stats`] fills them in.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            reads: self.reads(),
            writes: self.writes(),
            deletes: self.deletes(),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            transactions_started: self.transactions_started.load(Ordering::Relaxed),
            transactions_committed: self.transactions_committed(),
            transactions_discarded: self.transactions_discarded.load(Ordering::Relaxed),
            conflicts: self.conflicts(),
            wal_rotations: self.wal_rotations.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            merges: self.merges.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            ..StatsSnapshot::default()
        }
    }
}

/// A point-in-time snapshot of database statistics.
///
/// Unlike `DatabaseStats`, this is a plain struct that can be compared or
/// passed across threads without atomics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Successful reads.
    pub reads: u64,
    /// Committed puts.
    pub writes: u64,
    /// Committed deletes.
    pub deletes: u64,
    /// Value bytes committed.
    pub bytes_written: u64,
    /// Value bytes returned by reads.
    pub bytes_read: u64,
    /// Transactions begun.
    pub transactions_started: u64,
    /// Transactions committed.
    pub transactions_committed: u64,
    /// Transactions discarded or failed.
    pub transactions_discarded: u64,
    /// Commits rejected with `Conflict`.
    pub conflicts: u64,
    /// Log files rotated.
    pub wal_rotations: u64,
    /// Memtables written to segments.
    pub flushes: u64,
    /// Segment merges.
    pub merges: u64,
    /// Failed commits other than conflicts.
    pub errors: u64,

    /// Highest visible commit timestamp.
    pub published_ts: u64,
    /// Transactions currently open.
    pub active_transactions: u64,
    /// Approximate bytes in the active memtable.
    pub memtable_bytes: u64,
    /// Memtables waiting to be flushed.
    pub frozen_memtables: u64,
    /// Segments on disk (or in memory).
    pub segments: u64,
    /// Versions stored across all segments.
    pub segment_records: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        let stats = DatabaseStats::new();
        assert_eq!(stats.reads(), 0);
        assert_eq!(stats.writes(), 0);
        assert_eq!(stats.transactions_committed(), 0);
    }

    #[test]
    fn record_operations() {
        let stats = DatabaseStats::new();

        stats.record_read(100);
        stats.record_read(50);
        stats.record_write(200);
        stats.record_delete();

        let snap = stats.snapshot();
        assert_eq!(snap.reads, 2);
        assert_eq!(snap.bytes_read, 150);
        assert_eq!(snap.writes, 1);
        assert_eq!(snap.bytes_written, 200);
        assert_eq!(snap.deletes, 1);
    }

    #[test]
    fn record_transactions() {
        let stats = DatabaseStats::new();

        stats.record_transaction_start();
        stats.record_transaction_start();
        stats.record_transaction_commit();
        stats.record_conflict();
        stats.record_transaction_discard();

        let snap = stats.snapshot();
        assert_eq!(snap.transactions_started, 2);
        assert_eq!(snap.transactions_committed, 1);
        assert_eq!(snap.transactions_discarded, 1);
        assert_eq!(snap.conflicts, 1);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(DatabaseStats::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let s = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    s.record_read(1);
                    s.record_write(1);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(stats.reads(), 1000);
        assert_eq!(stats.writes(), 1000);
    }
}
