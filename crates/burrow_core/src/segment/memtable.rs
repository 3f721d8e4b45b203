//! The mutable, in-memory segment.

use crate::types::Entry;
use parking_lot::RwLock;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Clone)]
struct Slot {
    value: Vec<u8>,
    expires_at: u64,
    tombstone: bool,
}

/// Sorted versions of recently committed writes.
///
/// Keyed by `(key, Reverse(version))`, so for one key the newest version
/// comes first and a lookup at a read timestamp is a single range probe.
/// Only the committing thread inserts; any number of readers look up.
#[derive(Debug, Default)]
pub struct MemTable {
    entries: RwLock<BTreeMap<(Vec<u8>, Reverse<u64>), Slot>>,
    size: AtomicUsize,
    max_version: AtomicU64,
}

impl MemTable {
    /// Creates an empty memtable.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts one version.
    pub fn put(&self, entry: Entry) {
        self.size
            .fetch_add(entry.approximate_size(), Ordering::Relaxed);
        self.max_version
            .fetch_max(entry.version, Ordering::Relaxed);
        self.entries.write().insert(
            (entry.key, Reverse(entry.version)),
            Slot {
                value: entry.value,
                expires_at: entry.expires_at,
                tombstone: entry.tombstone,
            },
        );
    }

    /// Returns the newest version of `key` with `version <= as_of`.
    ///
    /// Tombstones and expired versions are returned as-is; the caller
    /// decides what they mean.
    #[must_use]
    pub fn get(&self, key: &[u8], as_of: u64) -> Option<Entry> {
        let start = (key.to_vec(), Reverse(as_of));
        let end = (key.to_vec(), Reverse(0));
        self.entries
            .read()
            .range(start..=end)
            .next()
            .map(|((key, Reverse(version)), slot)| Entry {
                key: key.clone(),
                value: slot.value.clone(),
                version: *version,
                expires_at: slot.expires_at,
                tombstone: slot.tombstone,
            })
    }

    /// Approximate bytes held.
    #[must_use]
    pub fn approximate_size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Number of versions held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no versions are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Highest version inserted, or 0.
    #[must_use]
    pub fn max_version(&self) -> u64 {
        self.max_version.load(Ordering::Relaxed)
    }

    /// Every version, ordered by key ascending then version descending.
    #[must_use]
    pub fn entries(&self) -> Vec<Entry> {
        self.entries
            .read()
            .iter()
            .map(|((key, Reverse(version)), slot)| Entry {
                key: key.clone(),
                value: slot.value.clone(),
                version: *version,
                expires_at: slot.expires_at,
                tombstone: slot.tombstone,
            })
            .collect()
    }
}
