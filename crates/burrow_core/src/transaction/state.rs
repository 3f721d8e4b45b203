//! Transaction state.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::transaction::oracle::fingerprint;
use crate::types::{Mutation, Timestamp};
use std::collections::{BTreeMap, HashSet};

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been discarded, by the caller or by a failed commit.
    Discarded,
}

/// Size limits applied to every buffered write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteLimits {
    /// Largest key in bytes.
    pub max_key_size: usize,
    /// Largest value in bytes.
    pub max_value_size: usize,
    /// Most pending writes.
    pub max_batch_count: usize,
    /// Most pending bytes.
    pub max_batch_size: u64,
}

impl From<&Config> for WriteLimits {
    fn from(config: &Config) -> Self {
        Self {
            max_key_size: config.max_key_size,
            max_value_size: config.max_value_size,
            max_batch_count: config.max_batch_count,
            max_batch_size: config.max_batch_size,
        }
    }
}

impl Default for WriteLimits {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// An open transaction.
///
/// Reads see the database as of `read_ts` plus this transaction's own
/// pending writes. Writes stay buffered here until commit.
#[derive(Debug)]
pub struct Transaction {
    /// Snapshot timestamp (reads see this point in time).
    read_ts: Timestamp,
    /// Whether writes are allowed and reads are tracked.
    update: bool,
    /// Current state.
    state: TransactionState,
    /// Pending writes, last write per key wins.
    writes: BTreeMap<Vec<u8>, Mutation>,
    /// Fingerprints of keys read from the database (update mode only).
    reads: HashSet<u64>,
    /// Bytes counted against `max_batch_size`.
    pending_size: u64,
}

impl Transaction {
    /// Creates a new transaction.
    pub(crate) fn new(read_ts: Timestamp, update: bool) -> Self {
        Self {
            read_ts,
            update,
            state: TransactionState::Active,
            writes: BTreeMap::new(),
            reads: HashSet::new(),
            pending_size: 0,
        }
    }

    /// Returns the snapshot timestamp.
    #[must_use]
    pub fn read_ts(&self) -> Timestamp {
        self.read_ts
    }

    /// Whether this is a read-write transaction.
    #[must_use]
    pub fn is_update(&self) -> bool {
        self.update
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Buffers a write of `value` under `key`.
    ///
    /// # Errors
    ///
    /// - `DiscardedTransaction` after commit or discard
    /// - `ReadOnlyTransaction` in read-only mode
    /// - `EmptyKey` / `InvalidArgument` for out-of-range keys or values
    /// - `TransactionTooBig` when the batch limits would be exceeded; the
    ///   transaction keeps its earlier writes
    pub fn set(
        &mut self,
        key: &[u8],
        value: Vec<u8>,
        expires_at: u64,
        limits: &WriteLimits,
    ) -> CoreResult<()> {
        if value.len() > limits.max_value_size {
            self.ensure_writable()?;
            return Err(CoreError::invalid_argument(format!(
                "value of {} bytes exceeds the {} byte limit",
                value.len(),
                limits.max_value_size
            )));
        }
        self.buffer(key, Mutation::Put { value, expires_at }, limits)
    }

    /// Buffers a delete of `key`.
    ///
    /// # Errors
    ///
    /// Same as [`Transaction::set`].
    pub fn delete(&mut self, key: &[u8], limits: &WriteLimits) -> CoreResult<()> {
        self.buffer(key, Mutation::Delete, limits)
    }

    fn buffer(&mut self, key: &[u8], mutation: Mutation, limits: &WriteLimits) -> CoreResult<()> {
        self.ensure_writable()?;
        validate_key(key, limits)?;

        let added = (key.len() + mutation.size()) as u64;
        let (count, size) = match self.writes.get(key) {
            Some(old) => (
                self.writes.len(),
                self.pending_size - (key.len() + old.size()) as u64 + added,
            ),
            None => (self.writes.len() + 1, self.pending_size + added),
        };
        if count > limits.max_batch_count || size > limits.max_batch_size {
            return Err(CoreError::TransactionTooBig { count, size });
        }

        self.writes.insert(key.to_vec(), mutation);
        self.pending_size = size;
        Ok(())
    }

    /// Records a database read for conflict detection.
    ///
    /// Ignored in read-only mode and for keys served from pending writes.
    pub fn record_read(&mut self, key: &[u8]) {
        if self.update && !self.writes.contains_key(key) {
            self.reads.insert(fingerprint(key));
        }
    }

    /// Gets the pending write for a key.
    #[must_use]
    pub fn pending(&self, key: &[u8]) -> Option<&Mutation> {
        self.writes.get(key)
    }

    /// Returns the number of pending writes.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    /// Returns the bytes counted against the batch size limit.
    #[must_use]
    pub fn pending_size(&self) -> u64 {
        self.pending_size
    }

    /// Fingerprints of the keys this transaction read.
    #[must_use]
    pub fn read_fingerprints(&self) -> Vec<u64> {
        self.reads.iter().copied().collect()
    }

    /// Removes and returns the pending writes, sorted by key.
    pub(crate) fn take_writes(&mut self) -> BTreeMap<Vec<u8>, Mutation> {
        self.pending_size = 0;
        std::mem::take(&mut self.writes)
    }

    /// Marks the transaction as committed.
    pub(crate) fn mark_committed(&mut self) {
        self.state = TransactionState::Committed;
    }

    /// Marks the transaction as discarded and drops its buffers.
    pub(crate) fn mark_discarded(&mut self) {
        self.state = TransactionState::Discarded;
        self.writes.clear();
        self.reads.clear();
        self.pending_size = 0;
    }

    /// Ensures the transaction is active.
    pub(crate) fn ensure_active(&self) -> CoreResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Committed | TransactionState::Discarded => {
                Err(CoreError::DiscardedTransaction)
            }
        }
    }

    fn ensure_writable(&self) -> CoreResult<()> {
        self.ensure_active()?;
        if self.update {
            Ok(())
        } else {
            Err(CoreError::ReadOnlyTransaction)
        }
    }
}

/// Checks a key against the size limits.
///
/// # Errors
///
/// `EmptyKey` or `InvalidArgument`.
pub(crate) fn validate_key(key: &[u8], limits: &WriteLimits) -> CoreResult<()> {
    if key.is_empty() {
        return Err(CoreError::EmptyKey);
    }
    if key.len() > limits.max_key_size {
        return Err(CoreError::invalid_argument(format!(
            "key of {} bytes exceeds the {} byte limit",
            key.len(),
            limits.max_key_size
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_txn() -> Transaction {
        Transaction::new(Timestamp::ZERO, true)
    }

    fn limits() -> WriteLimits {
        WriteLimits::default()
    }

    #[test]
    fn new_transaction_is_active() {
        let txn = create_txn();
        assert!(txn.is_active());
        assert!(txn.is_update());
        assert_eq!(txn.state(), TransactionState::Active);
    }

    #[test]
    fn set_records_write() {
        let mut txn = create_txn();
        txn.set(b"k", vec![1, 2, 3], 0, &limits()).unwrap();

        assert_eq!(txn.write_count(), 1);
        assert!(matches!(txn.pending(b"k"), Some(Mutation::Put { .. })));
    }

    #[test]
    fn delete_records_write() {
        let mut txn = create_txn();
        txn.delete(b"k", &limits()).unwrap();
        assert!(matches!(txn.pending(b"k"), Some(Mutation::Delete)));
    }

    #[test]
    fn set_overwrites_previous() {
        let mut txn = create_txn();
        txn.set(b"k", vec![1], 0, &limits()).unwrap();
        txn.set(b"k", vec![2, 2], 0, &limits()).unwrap();

        assert_eq!(txn.write_count(), 1);
        assert_eq!(txn.pending_size(), 1 + 2 + 8);
        match txn.pending(b"k") {
            Some(Mutation::Put { value, .. }) => assert_eq!(value, &vec![2, 2]),
            other => panic!("expected Put, got {other:?}"),
        }
    }

    #[test]
    fn cannot_write_after_commit() {
        let mut txn = create_txn();
        txn.mark_committed();
        assert!(matches!(
            txn.set(b"k", vec![], 0, &limits()),
            Err(CoreError::DiscardedTransaction)
        ));
    }

    #[test]
    fn cannot_write_after_discard() {
        let mut txn = create_txn();
        txn.mark_discarded();
        assert!(matches!(
            txn.delete(b"k", &limits()),
            Err(CoreError::DiscardedTransaction)
        ));
    }

    #[test]
    fn read_only_rejects_writes_and_skips_reads() {
        let mut txn = Transaction::new(Timestamp::ZERO, false);
        assert!(matches!(
            txn.set(b"k", vec![1], 0, &limits()),
            Err(CoreError::ReadOnlyTransaction)
        ));
        txn.record_read(b"k");
        assert!(txn.read_fingerprints().is_empty());
    }

    #[test]
    fn key_limits_are_enforced() {
        let mut txn = create_txn();
        let small = WriteLimits {
            max_key_size: 4,
            max_value_size: 4,
            ..WriteLimits::default()
        };

        assert!(matches!(
            txn.set(b"", vec![], 0, &small),
            Err(CoreError::EmptyKey)
        ));
        assert!(matches!(
            txn.set(b"toolong", vec![], 0, &small),
            Err(CoreError::InvalidArgument { .. })
        ));
        assert!(matches!(
            txn.set(b"k", vec![0; 5], 0, &small),
            Err(CoreError::InvalidArgument { .. })
        ));
        assert_eq!(txn.write_count(), 0);
    }

    #[test]
    fn batch_limits_keep_earlier_writes() {
        let mut txn = create_txn();
        let small = WriteLimits {
            max_batch_count: 2,
            ..WriteLimits::default()
        };

        txn.set(b"a", vec![1], 0, &small).unwrap();
        txn.set(b"b", vec![2], 0, &small).unwrap();
        // Overwriting does not grow the count.
        txn.set(b"a", vec![3], 0, &small).unwrap();

        let err = txn.set(b"c", vec![4], 0, &small).unwrap_err();
        assert!(matches!(err, CoreError::TransactionTooBig { count: 3, .. }));
        assert_eq!(txn.write_count(), 2);
        assert!(txn.is_active());
    }

    #[test]
    fn batch_size_limit() {
        let mut txn = create_txn();
        let small = WriteLimits {
            max_batch_size: 20,
            ..WriteLimits::default()
        };

        txn.set(b"a", vec![0; 10], 0, &small).unwrap();
        assert!(matches!(
            txn.set(b"b", vec![0; 10], 0, &small),
            Err(CoreError::TransactionTooBig { count: 2, size: 38 })
        ));
    }

    #[test]
    fn read_not_recorded_if_written() {
        let mut txn = create_txn();
        txn.record_read(b"seen");
        txn.set(b"mine", vec![1], 0, &limits()).unwrap();
        txn.record_read(b"mine");

        assert_eq!(txn.read_fingerprints(), vec![fingerprint(b"seen")]);
    }

    #[test]
    fn take_writes_returns_sorted_keys() {
        let mut txn = create_txn();
        txn.set(b"b", vec![], 0, &limits()).unwrap();
        txn.delete(b"a", &limits()).unwrap();

        let keys: Vec<_> = txn.take_writes().into_keys().collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(txn.write_count(), 0);
    }
}
