//! Core type definitions.

use std::fmt;

/// A commit timestamp.
///
/// Every committed write batch receives the next timestamp. Timestamps
/// strictly increase, survive restarts and are never reused. A reader
/// at timestamp `t` sees exactly the versions committed at or before `t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// The timestamp before any commit.
    pub const ZERO: Self = Self(0);

    /// Creates a new timestamp.
    #[must_use]
    pub const fn new(ts: u64) -> Self {
        Self(ts)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the following timestamp.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ts:{}", self.0)
    }
}

/// One version of one key.
///
/// `expires_at` is Unix milliseconds; `0` means the version never
/// expires. A tombstone records a delete and carries an empty value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The key.
    pub key: Vec<u8>,
    /// The value (empty for tombstones).
    pub value: Vec<u8>,
    /// Commit timestamp of the write.
    pub version: u64,
    /// Absolute expiry in Unix milliseconds, or 0.
    pub expires_at: u64,
    /// Whether this version deletes the key.
    pub tombstone: bool,
}

impl Entry {
    /// Creates a live entry.
    #[must_use]
    pub fn put(key: Vec<u8>, value: Vec<u8>, version: u64, expires_at: u64) -> Self {
        Self {
            key,
            value,
            version,
            expires_at,
            tombstone: false,
        }
    }

    /// Creates a tombstone.
    #[must_use]
    pub fn delete(key: Vec<u8>, version: u64) -> Self {
        Self {
            key,
            value: Vec::new(),
            version,
            expires_at: 0,
            tombstone: true,
        }
    }

    /// Approximate in-memory footprint, used for memtable accounting.
    #[must_use]
    pub fn approximate_size(&self) -> usize {
        self.key.len() + self.value.len() + 17
    }
}

/// A buffered write inside a transaction, before it has a version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Store a value with an absolute expiry (0 = never).
    Put {
        /// The value.
        value: Vec<u8>,
        /// Absolute expiry in Unix milliseconds.
        expires_at: u64,
    },
    /// Delete the key.
    Delete,
}

impl Mutation {
    /// Byte size counted against the batch size limit.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            Self::Put { value, .. } => value.len() + 8,
            Self::Delete => 1,
        }
    }

    /// Turns the mutation into a versioned entry.
    #[must_use]
    pub fn into_entry(self, key: Vec<u8>, version: u64) -> Entry {
        match self {
            Self::Put { value, expires_at } => Entry::put(key, value, version, expires_at),
            Self::Delete => Entry::delete(key, version),
        }
    }
}
