//! Cross-crate integration test helpers.
//!
//! [`IntegrationHarness`] runs operations against a database and a
//! `BTreeMap` model side by side and checks they agree.

use crate::fixtures::TestDatabase;
use crate::generators::KvOperation;
use burrow_core::{CoreError, Database};
use std::collections::BTreeMap;
use std::time::Duration;

const LONG_TTL: Duration = Duration::from_secs(3600);

/// A test harness for integration testing.
pub struct IntegrationHarness {
    /// The database under test.
    pub db: TestDatabase,
    model: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl IntegrationHarness {
    /// Creates a harness over an in-memory database.
    pub fn new() -> Self {
        Self::with_database(TestDatabase::memory())
    }

    /// Creates a harness over `db`, which must be empty.
    pub fn with_database(db: TestDatabase) -> Self {
        Self {
            db,
            model: BTreeMap::new(),
        }
    }

    /// Stores a value and tracks it.
    pub fn set(&mut self, key: &[u8], value: Vec<u8>, ttl: Option<Duration>) {
        self.db
            .set(key, value.clone(), ttl)
            .expect("Failed to set key");
        self.model.insert(key.to_vec(), value);
    }

    /// Deletes a key and stops tracking it.
    pub fn delete(&mut self, key: &[u8]) {
        self.db.delete(key).expect("Failed to delete key");
        self.model.remove(key);
    }

    /// Reads a key and checks it against the model.
    pub fn get_and_verify(&self, key: &[u8]) -> Option<Vec<u8>> {
        let actual = match self.db.get(key) {
            Ok(value) => Some(value),
            Err(CoreError::KeyNotFound) => None,
            Err(err) => panic!("get {key:?} failed: {err}"),
        };
        assert_eq!(
            actual.as_ref(),
            self.model.get(key),
            "value mismatch for {:?}",
            String::from_utf8_lossy(key)
        );
        actual
    }

    /// Applies one generated operation.
    pub fn apply(&mut self, op: &KvOperation) {
        match op {
            KvOperation::Set {
                key,
                value,
                with_ttl,
            } => self.set(key, value.clone(), with_ttl.then_some(LONG_TTL)),
            KvOperation::Delete { key } => self.delete(key),
            KvOperation::Get { key } => {
                self.get_and_verify(key);
            }
            KvOperation::Flush => self.db.flush().expect("Failed to flush"),
            KvOperation::Compact => {
                self.db.compact().expect("Failed to compact");
            }
        }
    }

    /// Checks every tracked key.
    pub fn verify_all(&self) {
        for key in self.model.keys() {
            self.get_and_verify(key);
        }
    }

    /// Closes and reopens the database, then checks every tracked key.
    #[must_use]
    pub fn reopen(self) -> Self {
        let harness = Self {
            db: self.db.reopen(),
            model: self.model,
        };
        harness.verify_all();
        harness
    }

    /// Number of keys the model expects to be live.
    pub fn tracked_count(&self) -> usize {
        self.model.len()
    }
}

impl Default for IntegrationHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Reusable scenario checks.
pub mod checks {
    use super::*;

    /// A transaction does not see commits that happen after it starts.
    pub fn test_snapshot_isolation(db: &Database) {
        db.set(b"iso", b"before".to_vec(), None).unwrap();

        let mut reader = db.new_transaction(false).unwrap();
        db.set(b"iso", b"after".to_vec(), None).unwrap();
        db.set(b"iso-new", b"x".to_vec(), None).unwrap();

        assert_eq!(reader.get(b"iso").unwrap(), b"before");
        assert!(matches!(reader.get(b"iso-new"), Err(CoreError::KeyNotFound)));
        reader.discard();

        assert_eq!(db.get(b"iso").unwrap(), b"after");
    }

    /// Discarded writes never become visible.
    pub fn test_transaction_discard(db: &Database) {
        let mut txn = db.new_transaction(true).unwrap();
        txn.set(b"discarded", b"x".to_vec(), None).unwrap();
        assert_eq!(txn.get(b"discarded").unwrap(), b"x");
        txn.discard();

        assert!(matches!(db.get(b"discarded"), Err(CoreError::KeyNotFound)));
        assert!(matches!(txn.commit(), Err(CoreError::DiscardedTransaction)));
    }

    /// Of two transactions that read and write the same key, the second
    /// to commit fails.
    pub fn test_conflict_detection(db: &Database) {
        db.set(b"counter", b"0".to_vec(), None).unwrap();

        let mut first = db.new_transaction(true).unwrap();
        let mut second = db.new_transaction(true).unwrap();
        first.get(b"counter").unwrap();
        second.get(b"counter").unwrap();
        first.set(b"counter", b"1".to_vec(), None).unwrap();
        second.set(b"counter", b"2".to_vec(), None).unwrap();

        first.commit().unwrap();
        assert!(matches!(second.commit(), Err(CoreError::Conflict)));
        assert_eq!(db.get(b"counter").unwrap(), b"1");
    }

    /// Blind writes to the same key both commit; the later one wins.
    pub fn test_blind_writes_do_not_conflict(db: &Database) {
        let mut first = db.new_transaction(true).unwrap();
        let mut second = db.new_transaction(true).unwrap();
        first.set(b"blind", b"1".to_vec(), None).unwrap();
        second.set(b"blind", b"2".to_vec(), None).unwrap();

        first.commit().unwrap();
        second.commit().unwrap();
        assert_eq!(db.get(b"blind").unwrap(), b"2");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::{operation_sequence_strategy, PropTestConfig};
    use burrow_core::Config;
    use proptest::prelude::*;

    #[test]
    fn test_harness_tracks_sets_and_deletes() {
        let mut harness = IntegrationHarness::new();
        harness.set(b"a", b"1".to_vec(), None);
        harness.set(b"b", b"2".to_vec(), Some(LONG_TTL));
        harness.delete(b"a");
        assert_eq!(harness.tracked_count(), 1);
        harness.verify_all();
        assert!(harness.get_and_verify(b"a").is_none());
    }

    #[test]
    fn test_scenarios_in_memory() {
        let db = TestDatabase::memory();
        checks::test_snapshot_isolation(&db);
        checks::test_transaction_discard(&db);
        checks::test_conflict_detection(&db);
        checks::test_blind_writes_do_not_conflict(&db);
    }

    #[test]
    fn test_scenarios_on_disk() {
        let db = TestDatabase::file();
        checks::test_snapshot_isolation(&db);
        checks::test_transaction_discard(&db);
        checks::test_conflict_detection(&db);
        checks::test_blind_writes_do_not_conflict(&db);
    }

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn database_matches_model_in_memory(ops in operation_sequence_strategy(1, 60)) {
            let mut harness = IntegrationHarness::new();
            for op in &ops {
                harness.apply(op);
            }
            harness.verify_all();
        }

        #[test]
        fn database_matches_model_across_reopen(ops in operation_sequence_strategy(1, 40)) {
            // A tiny memtable forces freezes in the middle of the sequence.
            let config = Config::new()
                .sync_writes(false)
                .background_work(false)
                .memtable_size(256)
                .merge_trigger(3);
            let mut harness = IntegrationHarness::with_database(TestDatabase::file_with_config(config));
            let (head, tail) = ops.split_at(ops.len() / 2);
            for op in head {
                harness.apply(op);
            }
            let mut harness = harness.reopen();
            for op in tail {
                harness.apply(op);
            }
            drop(harness.reopen());
        }
    }
}
