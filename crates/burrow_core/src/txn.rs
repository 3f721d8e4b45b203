//! Transaction handles.

use crate::database::Database;
use crate::error::CoreResult;
use crate::expiry::{expires_at_from_ttl, now_millis};
use crate::kv::KvAccess;
use crate::transaction::{Transaction, TransactionState};
use crate::types::Timestamp;
use std::time::Duration;

/// A transaction bound to its database.
///
/// Created by [`Database::new_transaction`]. Dropping a `Txn` discards it;
/// call [`Txn::commit`] to keep its writes.
///
/// ```rust,ignore
/// let mut txn = db.new_transaction(true)?;
/// let balance = txn.get(b"balance")?;
/// txn.set(b"balance", debit(balance), None)?;
/// txn.commit()?; // may fail with Conflict; retry the whole transaction
/// ```
#[derive(Debug)]
pub struct Txn<'db> {
    db: &'db Database,
    inner: Transaction,
}

impl<'db> Txn<'db> {
    pub(crate) fn new(db: &'db Database, inner: Transaction) -> Self {
        Self { db, inner }
    }

    /// The snapshot this transaction reads.
    #[must_use]
    pub fn read_ts(&self) -> Timestamp {
        self.inner.read_ts()
    }

    /// Whether writes are allowed.
    #[must_use]
    pub fn is_update(&self) -> bool {
        self.inner.is_update()
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.inner.state()
    }

    /// Buffers a write. See [`KvAccess::set`].
    ///
    /// # Errors
    ///
    /// `DiscardedTransaction` once finished, plus the errors of
    /// [`KvAccess::set`].
    pub fn set(&mut self, key: &[u8], value: Vec<u8>, ttl: Option<Duration>) -> CoreResult<()> {
        self.db.ensure_open()?;
        let expires_at = expires_at_from_ttl(now_millis(), ttl);
        self.db.manager().set(&mut self.inner, key, value, expires_at)
    }

    /// Reads a key. See [`KvAccess::get`].
    ///
    /// # Errors
    ///
    /// `DiscardedTransaction` once finished, plus the errors of
    /// [`KvAccess::get`].
    pub fn get(&mut self, key: &[u8]) -> CoreResult<Vec<u8>> {
        self.db.ensure_open()?;
        Ok(self.db.manager().get(&mut self.inner, key)?.value)
    }

    /// Buffers a delete. See [`KvAccess::delete`].
    ///
    /// # Errors
    ///
    /// Same as [`Txn::set`].
    pub fn delete(&mut self, key: &[u8]) -> CoreResult<()> {
        self.db.ensure_open()?;
        self.db.manager().delete(&mut self.inner, key)
    }

    /// Returns a key's expiry. See [`KvAccess::expires_at`].
    ///
    /// # Errors
    ///
    /// Same as [`Txn::get`].
    pub fn expires_at(&mut self, key: &[u8]) -> CoreResult<u64> {
        self.db.ensure_open()?;
        Ok(self.db.manager().get(&mut self.inner, key)?.expires_at)
    }

    /// Commits the buffered writes. The transaction is finished afterwards,
    /// whether or not the commit succeeded.
    ///
    /// # Errors
    ///
    /// - `Conflict` if a key this transaction read was committed after its
    ///   read timestamp; run the whole transaction again
    /// - `DiscardedTransaction` if already finished
    /// - `Storage`/`Io` if the log append failed
    pub fn commit(&mut self) -> CoreResult<()> {
        if let Err(err) = self.db.ensure_open() {
            self.discard();
            return Err(err);
        }
        let outcome = self.db.manager().commit(&mut self.inner)?;
        if outcome.froze {
            self.db.schedule_maintenance();
        }
        Ok(())
    }

    /// Finishes the transaction without committing. Safe to call any
    /// number of times, including after commit.
    pub fn discard(&mut self) {
        self.db.manager().discard(&mut self.inner);
    }
}

impl Drop for Txn<'_> {
    fn drop(&mut self) {
        self.discard();
    }
}

impl KvAccess for Txn<'_> {
    fn set(&mut self, key: &[u8], value: Vec<u8>, ttl: Option<Duration>) -> CoreResult<()> {
        Txn::set(self, key, value, ttl)
    }

    fn get(&mut self, key: &[u8]) -> CoreResult<Vec<u8>> {
        Txn::get(self, key)
    }

    fn delete(&mut self, key: &[u8]) -> CoreResult<()> {
        Txn::delete(self, key)
    }

    fn expires_at(&mut self, key: &[u8]) -> CoreResult<u64> {
        Txn::expires_at(self, key)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::CoreError;
    use crate::kv::KvAccess;
    use crate::transaction::TransactionState;
    use crate::Database;
    use std::time::Duration;

    #[test]
    fn discard_twice_is_harmless() {
        let db = Database::open_in_memory().unwrap();
        let mut txn = db.new_transaction(true).unwrap();
        txn.set(b"k", b"v".to_vec(), None).unwrap();

        txn.discard();
        txn.discard();
        assert_eq!(txn.state(), TransactionState::Discarded);
        assert!(matches!(txn.get(b"k"), Err(CoreError::DiscardedTransaction)));
        assert!(matches!(
            txn.set(b"k", vec![], None),
            Err(CoreError::DiscardedTransaction)
        ));
        drop(txn);

        assert!(matches!(db.get(b"k"), Err(CoreError::KeyNotFound)));
        assert_eq!(db.stats().active_transactions, 0);
    }

    #[test]
    fn discard_after_commit_is_harmless() {
        let db = Database::open_in_memory().unwrap();
        let mut txn = db.new_transaction(true).unwrap();
        txn.set(b"k", b"v".to_vec(), None).unwrap();
        txn.commit().unwrap();
        txn.discard();

        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(matches!(txn.commit(), Err(CoreError::DiscardedTransaction)));
        assert_eq!(db.get(b"k").unwrap(), b"v");
    }

    #[test]
    fn drop_discards() {
        let db = Database::open_in_memory().unwrap();
        {
            let mut txn = db.new_transaction(true).unwrap();
            txn.set(b"k", b"v".to_vec(), None).unwrap();
        }
        assert!(matches!(db.get(b"k"), Err(CoreError::KeyNotFound)));
        assert_eq!(db.stats().active_transactions, 0);
    }

    #[test]
    fn read_only_transaction_rejects_writes() {
        let db = Database::open_in_memory().unwrap();
        let mut txn = db.new_transaction(false).unwrap();
        assert!(!txn.is_update());
        assert!(matches!(
            txn.set(b"k", b"v".to_vec(), None),
            Err(CoreError::ReadOnlyTransaction)
        ));
        assert!(matches!(
            txn.delete(b"k"),
            Err(CoreError::ReadOnlyTransaction)
        ));
    }

    #[test]
    fn expires_at_reports_pending_ttl() {
        let db = Database::open_in_memory().unwrap();
        let mut txn = db.new_transaction(true).unwrap();
        txn.set(b"forever", b"v".to_vec(), None).unwrap();
        txn.set(b"soon", b"v".to_vec(), Some(Duration::from_secs(60)))
            .unwrap();

        assert_eq!(txn.expires_at(b"forever").unwrap(), 0);
        assert!(txn.expires_at(b"soon").unwrap() > 0);
        assert!(matches!(
            txn.expires_at(b"missing"),
            Err(CoreError::KeyNotFound)
        ));
    }

    fn copy_key<K: KvAccess>(kv: &mut K, from: &[u8], to: &[u8]) -> crate::CoreResult<()> {
        let value = kv.get(from)?;
        kv.set(to, value, None)
    }

    #[test]
    fn kv_access_works_for_both_handles() {
        let mut db = Database::open_in_memory().unwrap();
        db.set(b"a", b"1".to_vec(), None).unwrap();

        copy_key(&mut db, b"a", b"b").unwrap();
        assert_eq!(db.get(b"b").unwrap(), b"1");

        let mut txn = db.new_transaction(true).unwrap();
        copy_key(&mut txn, b"b", b"c").unwrap();
        txn.commit().unwrap();
        drop(txn);
        assert_eq!(db.get(b"c").unwrap(), b"1");
    }
}
