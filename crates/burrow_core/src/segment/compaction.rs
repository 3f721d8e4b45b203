//! Segment merging.
//!
//! A merge folds several segments into one, dropping versions no reader
//! can observe any more.
//!
//! ## Invariants
//!
//! - A merge **MUST NOT** change what any live reader sees
//! - Every version newer than the low watermark is kept
//! - Of the versions at or below the watermark only the newest survives,
//!   and it is dropped too when it is a tombstone or has expired
//! - Output is sorted by key ascending, version descending

use crate::expiry::is_expired;
use crate::segment::record::SegmentRecord;
use crate::types::Entry;

/// What a merge did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionResult {
    /// Versions in the input.
    pub input_records: usize,
    /// Versions in the output.
    pub output_records: usize,
    /// Tombstones removed.
    pub tombstones_removed: usize,
    /// Expired versions removed.
    pub expired_removed: usize,
    /// Shadowed versions removed.
    pub obsolete_versions_removed: usize,
    /// Encoded bytes saved.
    pub bytes_saved: usize,
}

/// Merges versions against a low watermark.
///
/// The watermark is the oldest read timestamp any open transaction may
/// still use; nothing at or below it can be read except the newest
/// version per key.
///
/// ```ignore
/// let compactor = Compactor::new(low_watermark, now_ms);
/// let (output, stats) = compactor.compact(records);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Compactor {
    low_watermark: u64,
    now_ms: u64,
}

impl Compactor {
    /// Creates a compactor for the given watermark and wall-clock time.
    #[must_use]
    pub fn new(low_watermark: u64, now_ms: u64) -> Self {
        Self {
            low_watermark,
            now_ms,
        }
    }

    /// Merges `records` (any order) into a sorted, pruned run.
    #[must_use]
    pub fn compact(&self, mut records: Vec<Entry>) -> (Vec<Entry>, CompactionResult) {
        let input_records = records.len();
        let input_size: usize = records.iter().map(SegmentRecord::encoded_size).sum();

        records.sort_by(|a, b| {
            a.key
                .cmp(&b.key)
                .then_with(|| b.version.cmp(&a.version))
        });
        records.dedup_by(|later, earlier| later.key == earlier.key && later.version == earlier.version);

        let mut result = CompactionResult {
            input_records,
            ..CompactionResult::default()
        };
        let mut output = Vec::with_capacity(records.len());
        // Key whose at-or-below-watermark version has been decided.
        let mut settled: Option<Vec<u8>> = None;

        for record in records {
            if settled.as_deref() == Some(record.key.as_slice()) {
                result.obsolete_versions_removed += 1;
                continue;
            }
            if record.version > self.low_watermark {
                output.push(record);
                continue;
            }

            settled = Some(record.key.clone());
            if record.tombstone {
                result.tombstones_removed += 1;
            } else if is_expired(record.expires_at, self.now_ms) {
                result.expired_removed += 1;
            } else {
                output.push(record);
            }
        }

        let output_size: usize = output.iter().map(SegmentRecord::encoded_size).sum();
        result.output_records = output.len();
        result.bytes_saved = input_size.saturating_sub(output_size);
        (output, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_put(key: &[u8], value: &[u8], version: u64) -> Entry {
        Entry::put(key.to_vec(), value.to_vec(), version, 0)
    }

    fn make_tombstone(key: &[u8], version: u64) -> Entry {
        Entry::delete(key.to_vec(), version)
    }

    fn versions(output: &[Entry]) -> Vec<(Vec<u8>, u64)> {
        output.iter().map(|e| (e.key.clone(), e.version)).collect()
    }

    #[test]
    fn compact_removes_older_versions() {
        let records = vec![
            make_put(b"k", b"v1", 1),
            make_put(b"k", b"v2", 2),
            make_put(b"k", b"v3", 3),
        ];

        let (output, stats) = Compactor::new(10, 0).compact(records);

        assert_eq!(output.len(), 1);
        assert_eq!(output[0].value, b"v3");
        assert_eq!(stats.obsolete_versions_removed, 2);
    }

    #[test]
    fn versions_above_watermark_survive() {
        let records = vec![
            make_put(b"k", b"v1", 1),
            make_put(b"k", b"v2", 2),
            make_put(b"k", b"v5", 5),
            make_put(b"k", b"v6", 6),
        ];

        let (output, _) = Compactor::new(3, 0).compact(records);

        // 6 and 5 may still be hidden from readers at 3 or 4; 2 is what
        // those readers see; 1 is unreachable.
        assert_eq!(
            versions(&output),
            vec![(b"k".to_vec(), 6), (b"k".to_vec(), 5), (b"k".to_vec(), 2)]
        );
    }

    #[test]
    fn compact_removes_tombstones_below_watermark() {
        let records = vec![
            make_put(b"a", b"data", 1),
            make_tombstone(b"a", 2),
            make_put(b"b", b"live", 3),
        ];

        let (output, stats) = Compactor::new(10, 0).compact(records);

        assert_eq!(versions(&output), vec![(b"b".to_vec(), 3)]);
        assert_eq!(stats.tombstones_removed, 1);
        assert_eq!(stats.obsolete_versions_removed, 1);
    }

    #[test]
    fn tombstone_above_watermark_is_kept() {
        let records = vec![make_put(b"a", b"data", 1), make_tombstone(b"a", 5)];

        let (output, stats) = Compactor::new(3, 0).compact(records);

        assert_eq!(output.len(), 2);
        assert!(output[0].tombstone);
        assert_eq!(stats.tombstones_removed, 0);
    }

    #[test]
    fn expired_versions_are_dropped() {
        let records = vec![
            Entry::put(b"a".to_vec(), b"old".to_vec(), 1, 0),
            Entry::put(b"a".to_vec(), b"ttl".to_vec(), 2, 1_000),
            Entry::put(b"b".to_vec(), b"fresh".to_vec(), 2, 9_000),
        ];

        let (output, stats) = Compactor::new(10, 5_000).compact(records);

        // The expired newest version hides "old" too.
        assert_eq!(versions(&output), vec![(b"b".to_vec(), 2)]);
        assert_eq!(stats.expired_removed, 1);
    }

    #[test]
    fn compact_empty_input() {
        let (output, stats) = Compactor::new(1, 0).compact(vec![]);

        assert!(output.is_empty());
        assert_eq!(stats.input_records, 0);
        assert_eq!(stats.output_records, 0);
    }

    #[test]
    fn compact_deterministic_order() {
        let records = vec![
            make_put(b"b", b"x", 1),
            make_put(b"a", b"x", 2),
            make_put(b"c", b"x", 3),
            make_put(b"a", b"y", 4),
        ];

        let (output, _) = Compactor::new(0, 0).compact(records);

        assert_eq!(
            versions(&output),
            vec![
                (b"a".to_vec(), 4),
                (b"a".to_vec(), 2),
                (b"b".to_vec(), 1),
                (b"c".to_vec(), 3)
            ]
        );
    }
}
