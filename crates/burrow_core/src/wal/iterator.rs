//! Streaming WAL record iterator.
//!
//! Reads one record at a time from the backend so replay memory is
//! bounded by the largest record, not the log.

use crate::error::{CoreError, CoreResult};
use crate::wal::record::{
    WalRecord, WalRecordType, CRC_SIZE, HEADER_SIZE, WAL_MAGIC, WAL_VERSION,
};
use burrow_storage::StorageBackend;

/// A streaming iterator over WAL records.
///
/// Yields `(offset, record)` pairs. A truncated header or payload at the
/// end of the log ends iteration cleanly; afterwards
/// [`WalRecordIterator::is_torn`] reports whether bytes were left over
/// and [`WalRecordIterator::valid_end`] gives the offset just past the
/// last complete record. Any other malformation is returned as an error
/// and stops iteration.
pub struct WalRecordIterator<'a> {
    backend: &'a dyn StorageBackend,
    total_size: u64,
    offset: u64,
    torn: bool,
    finished: bool,
}

impl<'a> WalRecordIterator<'a> {
    /// Creates an iterator starting at `start_offset`.
    ///
    /// # Errors
    ///
    /// Fails if the backend size cannot be determined.
    pub fn new(backend: &'a dyn StorageBackend, start_offset: u64) -> CoreResult<Self> {
        let total_size = backend.size()?;
        Ok(Self {
            backend,
            total_size,
            offset: start_offset,
            torn: false,
            finished: false,
        })
    }

    /// Offset just past the last complete record read so far.
    #[must_use]
    pub fn valid_end(&self) -> u64 {
        self.offset
    }

    /// Whether iteration stopped at an incomplete trailing record.
    #[must_use]
    pub fn is_torn(&self) -> bool {
        self.torn
    }

    fn remaining(&self) -> u64 {
        self.total_size.saturating_sub(self.offset)
    }

    fn stop_torn(&mut self) -> CoreResult<Option<(u64, WalRecord)>> {
        self.torn = true;
        self.finished = true;
        Ok(None)
    }

    fn read_next_record(&mut self) -> CoreResult<Option<(u64, WalRecord)>> {
        if self.finished {
            return Ok(None);
        }

        let start = self.offset;
        let remaining = self.remaining();
        if remaining == 0 {
            self.finished = true;
            return Ok(None);
        }
        if remaining < HEADER_SIZE as u64 {
            return self.stop_torn();
        }

        let header = self.backend.read_at(start, HEADER_SIZE)?;

        if header[0..4] != WAL_MAGIC {
            self.finished = true;
            return Err(CoreError::wal_corruption(format!(
                "invalid magic at offset {start}"
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > WAL_VERSION {
            self.finished = true;
            return Err(CoreError::wal_corruption(format!(
                "unsupported version {version} at offset {start}"
            )));
        }

        let type_byte = header[6];
        let Some(record_type) = WalRecordType::from_byte(type_byte) else {
            self.finished = true;
            return Err(CoreError::wal_corruption(format!(
                "unknown record type {type_byte} at offset {start}"
            )));
        };

        let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as u64;
        let total_len = HEADER_SIZE as u64 + payload_len + CRC_SIZE as u64;
        if remaining < total_len {
            return self.stop_torn();
        }

        let body = self
            .backend
            .read_at(start + HEADER_SIZE as u64, payload_len as usize + CRC_SIZE)?;
        let (payload, crc_bytes) = body.split_at(payload_len as usize);
        let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header);
        hasher.update(payload);
        let computed = hasher.finalize();
        if stored != computed {
            self.finished = true;
            return Err(CoreError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }

        let record = match WalRecord::decode_payload(record_type, payload) {
            Ok(record) => record,
            Err(err) => {
                self.finished = true;
                return Err(err);
            }
        };

        self.offset += total_len;
        Ok(Some((start, record)))
    }
}

impl Iterator for WalRecordIterator<'_> {
    type Item = CoreResult<(u64, WalRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next_record().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Entry, Timestamp};
    use burrow_storage::InMemoryBackend;

    fn batch(ts: u64, key: &[u8]) -> WalRecord {
        WalRecord::Batch {
            commit_ts: Timestamp::new(ts),
            entries: vec![Entry::put(key.to_vec(), b"v".to_vec(), ts, 0)],
        }
    }

    fn log_of(records: &[WalRecord]) -> Vec<u8> {
        records
            .iter()
            .flat_map(|r| r.encode().unwrap())
            .collect()
    }

    #[test]
    fn empty_log_yields_nothing() {
        let backend = InMemoryBackend::new();
        let mut iter = WalRecordIterator::new(&backend, 0).unwrap();
        assert!(iter.next().is_none());
        assert!(!iter.is_torn());
        assert_eq!(iter.valid_end(), 0);
    }

    #[test]
    fn yields_records_with_offsets() {
        let records = vec![batch(1, b"a"), batch(2, b"b")];
        let data = log_of(&records);
        let first_len = records[0].encode().unwrap().len() as u64;
        let backend = InMemoryBackend::with_data(data.clone());

        let read: Vec<_> = WalRecordIterator::new(&backend, 0)
            .unwrap()
            .collect::<CoreResult<_>>()
            .unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[0], (0, records[0].clone()));
        assert_eq!(read[1], (first_len, records[1].clone()));
    }

    #[test]
    fn truncated_header_is_clean_end() {
        let mut data = log_of(&[batch(1, b"a")]);
        let good = data.len() as u64;
        data.extend_from_slice(&WAL_MAGIC);
        let backend = InMemoryBackend::with_data(data);

        let mut iter = WalRecordIterator::new(&backend, 0).unwrap();
        assert!(iter.next().unwrap().is_ok());
        assert!(iter.next().is_none());
        assert!(iter.is_torn());
        assert_eq!(iter.valid_end(), good);
    }

    #[test]
    fn truncated_payload_is_clean_end() {
        let mut data = log_of(&[batch(1, b"a"), batch(2, b"b")]);
        data.truncate(data.len() - 3);
        let backend = InMemoryBackend::with_data(data);

        let mut iter = WalRecordIterator::new(&backend, 0).unwrap();
        assert!(iter.next().unwrap().is_ok());
        assert!(iter.next().is_none());
        assert!(iter.is_torn());
    }

    #[test]
    fn crc_mismatch_is_fatal() {
        let mut data = log_of(&[batch(1, b"key")]);
        data[HEADER_SIZE + 2] ^= 0xFF;
        let backend = InMemoryBackend::with_data(data);

        let mut iter = WalRecordIterator::new(&backend, 0).unwrap();
        assert!(matches!(
            iter.next(),
            Some(Err(CoreError::ChecksumMismatch { .. }))
        ));
        assert!(iter.next().is_none());
    }

    #[test]
    fn bad_magic_is_fatal() {
        let mut data = log_of(&[batch(1, b"key")]);
        data[0] = b'X';
        let backend = InMemoryBackend::with_data(data);
        let mut iter = WalRecordIterator::new(&backend, 0).unwrap();
        assert!(matches!(
            iter.next(),
            Some(Err(CoreError::WalCorruption { .. }))
        ));
    }

    #[test]
    fn future_version_is_fatal() {
        let mut data = log_of(&[batch(1, b"key")]);
        data[4..6].copy_from_slice(&(WAL_VERSION + 1).to_le_bytes());
        let backend = InMemoryBackend::with_data(data);
        let mut iter = WalRecordIterator::new(&backend, 0).unwrap();
        assert!(matches!(
            iter.next(),
            Some(Err(CoreError::WalCorruption { .. }))
        ));
    }

    #[test]
    fn unknown_type_is_fatal() {
        let mut data = log_of(&[batch(1, b"key")]);
        data[6] = 0x7F;
        let backend = InMemoryBackend::with_data(data);
        let mut iter = WalRecordIterator::new(&backend, 0).unwrap();
        assert!(matches!(
            iter.next(),
            Some(Err(CoreError::WalCorruption { .. }))
        ));
    }
}
