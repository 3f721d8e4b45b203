//! The key-value surface shared by databases and transactions.

use crate::error::CoreResult;
use std::time::Duration;

/// Get, set, delete and expiry lookups.
///
/// [`crate::Database`] runs each call in its own transaction;
/// [`crate::Txn`] buffers writes until commit. Code written against this
/// trait works with either:
///
/// ```rust,ignore
/// fn bump<K: KvAccess>(kv: &mut K, key: &[u8]) -> CoreResult<()> {
///     let n = kv.get(key).map(|v| v[0]).unwrap_or(0);
///     kv.set(key, vec![n + 1], None)
/// }
/// ```
pub trait KvAccess {
    /// Stores `value` under `key`. A `ttl` of `None` or zero never expires.
    ///
    /// # Errors
    ///
    /// `EmptyKey`, `InvalidArgument` or `TransactionTooBig` for rejected
    /// writes; `ReadOnlyTransaction` in a read-only transaction.
    fn set(&mut self, key: &[u8], value: Vec<u8>, ttl: Option<Duration>) -> CoreResult<()>;

    /// Returns the live value of `key`.
    ///
    /// # Errors
    ///
    /// `KeyNotFound` when the key is absent, deleted or expired.
    fn get(&mut self, key: &[u8]) -> CoreResult<Vec<u8>>;

    /// Deletes `key`. Deleting a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Same as [`KvAccess::set`].
    fn delete(&mut self, key: &[u8]) -> CoreResult<()>;

    /// Returns the absolute expiry of `key` in Unix milliseconds, 0 for
    /// never.
    ///
    /// # Errors
    ///
    /// Same as [`KvAccess::get`].
    fn expires_at(&mut self, key: &[u8]) -> CoreResult<u64>;
}
