//! Immutable on-disk segments.

use crate::error::{CoreError, CoreResult};
use crate::segment::record::{SegmentRecord, FILE_HEADER_SIZE};
use crate::types::Entry;
use burrow_storage::StorageBackend;
use std::cmp::{Ordering, Reverse};

#[derive(Debug)]
struct IndexEntry {
    key: Vec<u8>,
    version: u64,
    offset: u64,
    len: u32,
}

/// A sorted, immutable run of versions.
///
/// Records are stored by key ascending, version descending. The index
/// holds every key and version in memory; values stay in the backend
/// and are read on lookup.
pub struct Segment {
    id: u64,
    backend: Box<dyn StorageBackend>,
    index: Vec<IndexEntry>,
    max_version: u64,
}

impl Segment {
    /// Writes `entries` into an empty backend and syncs it.
    ///
    /// `entries` must already be sorted by key ascending, then version
    /// descending, as produced by [`crate::segment::MemTable::entries`]
    /// or a merge.
    ///
    /// # Errors
    ///
    /// Fails on encoding or backend errors, or if the input is unsorted.
    pub fn write(
        id: u64,
        mut backend: Box<dyn StorageBackend>,
        entries: &[Entry],
    ) -> CoreResult<Self> {
        let mut index = Vec::with_capacity(entries.len());
        let mut max_version = 0;
        let mut buf = Vec::with_capacity(
            FILE_HEADER_SIZE + entries.iter().map(SegmentRecord::encoded_size).sum::<usize>(),
        );
        buf.extend_from_slice(&SegmentRecord::file_header());

        for pair in entries.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if compare(&a.key, a.version, &b.key, b.version) != Ordering::Less {
                return Err(CoreError::invalid_argument(format!(
                    "segment {id} input is not sorted"
                )));
            }
        }

        for entry in entries {
            let record = SegmentRecord::encode(entry)?;
            index.push(IndexEntry {
                key: entry.key.clone(),
                version: entry.version,
                offset: buf.len() as u64,
                len: record.len() as u32,
            });
            max_version = max_version.max(entry.version);
            buf.extend_from_slice(&record);
        }

        backend.append(&buf)?;
        backend.flush()?;
        backend.sync()?;

        Ok(Self {
            id,
            backend,
            index,
            max_version,
        })
    }

    /// Opens an existing segment and rebuilds its index.
    ///
    /// Every record's checksum is verified.
    ///
    /// # Errors
    ///
    /// `SegmentCorruption` or `ChecksumMismatch` if the file is damaged.
    pub fn open(id: u64, backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        let data = backend.read_all()?;
        SegmentRecord::check_file_header(&data)?;

        let mut index: Vec<IndexEntry> = Vec::new();
        let mut max_version = 0;
        let mut offset = FILE_HEADER_SIZE;
        while offset < data.len() {
            let len = SegmentRecord::peek_len(&data[offset..])
                .filter(|&len| len >= SegmentRecord::HEADER_SIZE + SegmentRecord::CRC_SIZE)
                .ok_or_else(|| {
                    CoreError::segment_corruption(format!(
                        "segment {id}: bad record length at offset {offset}"
                    ))
                })?;
            let end = offset.checked_add(len).filter(|&end| end <= data.len()).ok_or_else(|| {
                CoreError::segment_corruption(format!(
                    "segment {id}: record at offset {offset} runs past end of file"
                ))
            })?;

            let entry = SegmentRecord::decode(&data[offset..end])?;
            if let Some(prev) = index.last() {
                if compare(&prev.key, prev.version, &entry.key, entry.version) != Ordering::Less {
                    return Err(CoreError::segment_corruption(format!(
                        "segment {id}: records out of order at offset {offset}"
                    )));
                }
            }
            max_version = max_version.max(entry.version);
            index.push(IndexEntry {
                key: entry.key,
                version: entry.version,
                offset: offset as u64,
                len: len as u32,
            });
            offset = end;
        }

        Ok(Self {
            id,
            backend,
            index,
            max_version,
        })
    }

    /// Segment id (`seg-<id>.dat`).
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of versions stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the segment holds no versions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Highest version stored, or 0.
    #[must_use]
    pub fn max_version(&self) -> u64 {
        self.max_version
    }

    /// File size in bytes.
    ///
    /// # Errors
    ///
    /// Fails if the backend size cannot be read.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Returns the newest version of `key` with `version <= as_of`.
    ///
    /// # Errors
    ///
    /// Fails if the record cannot be read back or is corrupted.
    pub fn get(&self, key: &[u8], as_of: u64) -> CoreResult<Option<Entry>> {
        // First index position not ordered before (key, as_of).
        let pos = self
            .index
            .partition_point(|e| compare(&e.key, e.version, key, as_of) == Ordering::Less);
        match self.index.get(pos) {
            Some(found) if found.key == key => self.read(found).map(Some),
            _ => Ok(None),
        }
    }

    /// Reads every version in stored order.
    ///
    /// # Errors
    ///
    /// Fails on read or decode errors.
    pub fn entries(&self) -> CoreResult<Vec<Entry>> {
        self.index.iter().map(|e| self.read(e)).collect()
    }

    fn read(&self, at: &IndexEntry) -> CoreResult<Entry> {
        let data = self.backend.read_at(at.offset, at.len as usize)?;
        SegmentRecord::decode(&data)
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("records", &self.index.len())
            .field("max_version", &self.max_version)
            .finish_non_exhaustive()
    }
}

/// Segment order: key ascending, then version descending.
fn compare(a_key: &[u8], a_version: u64, b_key: &[u8], b_version: u64) -> Ordering {
    (a_key, Reverse(a_version)).cmp(&(b_key, Reverse(b_version)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_storage::InMemoryBackend;

    fn sample() -> Vec<Entry> {
        vec![
            Entry::put(b"apple".to_vec(), b"red".to_vec(), 7, 0),
            Entry::put(b"apple".to_vec(), b"green".to_vec(), 3, 0),
            Entry::delete(b"banana".to_vec(), 5),
            Entry::put(b"banana".to_vec(), b"yellow".to_vec(), 2, 0),
            Entry::put(b"cherry".to_vec(), b"dark".to_vec(), 4, 99),
        ]
    }

    fn written() -> Segment {
        Segment::write(1, Box::new(InMemoryBackend::new()), &sample()).unwrap()
    }

    #[test]
    fn lookup_by_read_timestamp() {
        let seg = written();
        assert_eq!(seg.get(b"apple", 10).unwrap().unwrap().value, b"red");
        assert_eq!(seg.get(b"apple", 6).unwrap().unwrap().value, b"green");
        assert_eq!(seg.get(b"apple", 3).unwrap().unwrap().version, 3);
        assert!(seg.get(b"apple", 2).unwrap().is_none());
        assert!(seg.get(b"banana", 5).unwrap().unwrap().tombstone);
        assert_eq!(seg.get(b"banana", 4).unwrap().unwrap().value, b"yellow");
        assert_eq!(seg.get(b"cherry", 4).unwrap().unwrap().expires_at, 99);
    }

    #[test]
    fn missing_keys() {
        let seg = written();
        assert!(seg.get(b"aardvark", 10).unwrap().is_none());
        assert!(seg.get(b"blueberry", 10).unwrap().is_none());
        assert!(seg.get(b"zucchini", 10).unwrap().is_none());
    }

    #[test]
    fn reopen_rebuilds_index() {
        let seg = written();
        let bytes = seg.backend.read_all().unwrap();
        let reopened = Segment::open(1, Box::new(InMemoryBackend::with_data(bytes))).unwrap();

        assert_eq!(reopened.len(), 5);
        assert_eq!(reopened.max_version(), 7);
        assert_eq!(reopened.entries().unwrap(), sample());
    }

    #[test]
    fn unsorted_input_is_rejected() {
        let mut entries = sample();
        entries.swap(0, 1);
        assert!(Segment::write(1, Box::new(InMemoryBackend::new()), &entries).is_err());
    }

    #[test]
    fn corrupted_file_fails_open() {
        let seg = written();
        let mut bytes = seg.backend.read_all().unwrap();
        let last = bytes.len() - 6;
        bytes[last] ^= 0xFF;
        assert!(Segment::open(1, Box::new(InMemoryBackend::with_data(bytes))).is_err());
    }

    #[test]
    fn truncated_file_fails_open() {
        let seg = written();
        let mut bytes = seg.backend.read_all().unwrap();
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(
            Segment::open(1, Box::new(InMemoryBackend::with_data(bytes))),
            Err(CoreError::SegmentCorruption { .. })
        ));
    }

    #[test]
    fn empty_segment() {
        let seg = Segment::write(2, Box::new(InMemoryBackend::new()), &[]).unwrap();
        assert!(seg.is_empty());
        assert!(seg.get(b"k", u64::MAX).unwrap().is_none());
        assert_eq!(seg.size().unwrap(), FILE_HEADER_SIZE as u64);
    }
}
