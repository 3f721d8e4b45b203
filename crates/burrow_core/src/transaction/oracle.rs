//! Commit timestamps and conflict detection.

use crate::error::{CoreError, CoreResult};
use crate::types::Timestamp;
use parking_lot::{Mutex, MutexGuard};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

/// Hashes a key to the 64-bit fingerprint tracked in read and write sets.
///
/// Two keys with the same fingerprint conflict as if they were equal, so
/// collisions can only cause spurious conflicts, never missed ones.
#[must_use]
pub fn fingerprint(key: &[u8]) -> u64 {
    let digest = Sha256::digest(key);
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// A committed update transaction, kept while some active transaction
/// could still conflict with it.
#[derive(Debug)]
struct CommittedTxn {
    ts: u64,
    writes: HashSet<u64>,
}

/// State guarded by the commit mutex.
#[derive(Debug, Default)]
pub struct CommitState {
    last_ts: u64,
    committed: Vec<CommittedTxn>,
}

/// A multiset of read timestamps.
#[derive(Debug, Default)]
struct ReadMarks(BTreeMap<u64, usize>);

impl ReadMarks {
    fn add(&mut self, ts: u64) {
        *self.0.entry(ts).or_insert(0) += 1;
    }

    fn remove(&mut self, ts: u64) {
        if let Some(count) = self.0.get_mut(&ts) {
            *count -= 1;
            if *count == 0 {
                self.0.remove(&ts);
            }
        }
    }

    fn min(&self) -> Option<u64> {
        self.0.keys().next().copied()
    }

    fn len(&self) -> usize {
        self.0.values().sum()
    }
}

#[derive(Debug, Default)]
struct Readers {
    all: ReadMarks,
    update: ReadMarks,
}

/// Hands out read and commit timestamps.
///
/// The commit mutex covers only the conflict check and the timestamp
/// assignment. Publication is separate: `published` only moves forward,
/// and a transaction reads at whatever was published when it began.
#[derive(Debug)]
pub struct Oracle {
    commit: Mutex<CommitState>,
    published: AtomicU64,
    readers: Mutex<Readers>,
}

impl Oracle {
    /// Creates an oracle resuming after `last`.
    #[must_use]
    pub fn new(last: Timestamp) -> Self {
        Self {
            commit: Mutex::new(CommitState {
                last_ts: last.as_u64(),
                committed: Vec::new(),
            }),
            published: AtomicU64::new(last.as_u64()),
            readers: Mutex::new(Readers::default()),
        }
    }

    /// Registers a new reader and returns its read timestamp.
    pub fn begin(&self, update: bool) -> Timestamp {
        let mut readers = self.readers.lock();
        let ts = self.published.load(Ordering::SeqCst);
        readers.all.add(ts);
        if update {
            readers.update.add(ts);
        }
        Timestamp::new(ts)
    }

    /// Deregisters a reader added by [`Oracle::begin`].
    pub fn end(&self, read_ts: Timestamp, update: bool) {
        let mut readers = self.readers.lock();
        readers.all.remove(read_ts.as_u64());
        if update {
            readers.update.remove(read_ts.as_u64());
        }
    }

    /// Highest timestamp whose writes are visible.
    #[must_use]
    pub fn published(&self) -> Timestamp {
        Timestamp::new(self.published.load(Ordering::SeqCst))
    }

    /// Makes everything committed at or below `ts` visible.
    pub fn publish(&self, ts: Timestamp) {
        self.published.fetch_max(ts.as_u64(), Ordering::SeqCst);
    }

    /// Oldest read timestamp any active transaction holds, or the
    /// published timestamp when none is active. No reader can see a
    /// version that is shadowed at this timestamp.
    #[must_use]
    pub fn low_watermark(&self) -> Timestamp {
        let readers = self.readers.lock();
        let published = self.published.load(Ordering::SeqCst);
        Timestamp::new(readers.all.min().map_or(published, |ts| ts.min(published)))
    }

    /// Number of transactions between begin and end.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.readers.lock().all.len()
    }

    /// Takes the commit mutex.
    pub fn lock_commit(&self) -> CommitGuard<'_> {
        CommitGuard {
            oracle: self,
            state: self.commit.lock(),
        }
    }
}

/// Holds the commit mutex. Dropping it lets the next committer in.
pub struct CommitGuard<'a> {
    oracle: &'a Oracle,
    state: MutexGuard<'a, CommitState>,
}

impl CommitGuard<'_> {
    /// Fails with `Conflict` if a transaction that committed after
    /// `read_ts` wrote any of `reads`.
    ///
    /// # Errors
    ///
    /// `Conflict` as above.
    pub fn check(&self, read_ts: Timestamp, reads: &[u64]) -> CoreResult<()> {
        let read_ts = read_ts.as_u64();
        let conflicted = self
            .state
            .committed
            .iter()
            .filter(|txn| txn.ts > read_ts)
            .any(|txn| reads.iter().any(|fp| txn.writes.contains(fp)));
        if conflicted {
            Err(CoreError::Conflict)
        } else {
            Ok(())
        }
    }

    /// Assigns the next commit timestamp and remembers `writes` for later
    /// conflict checks.
    pub fn assign(&mut self, writes: HashSet<u64>) -> Timestamp {
        self.prune();
        self.state.last_ts += 1;
        let ts = self.state.last_ts;
        self.state.committed.push(CommittedTxn { ts, writes });
        Timestamp::new(ts)
    }

    /// Drops history no active or future update transaction can conflict
    /// with.
    ///
    /// New transactions read at `published`, which trails commits still
    /// being logged, so the horizon never passes it.
    fn prune(&mut self) {
        let horizon = {
            let readers = self.oracle.readers.lock();
            let published = self.oracle.published.load(Ordering::SeqCst);
            readers.update.min().map_or(published, |ts| ts.min(published))
        };
        self.state.committed.retain(|txn| txn.ts > horizon);
    }
}
