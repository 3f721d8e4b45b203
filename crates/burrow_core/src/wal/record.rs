//! WAL record types and serialization.

use crate::encoding::{compute_crc32, put_len_prefixed, Reader};
use crate::error::{CoreError, CoreResult};
use crate::types::{Entry, Timestamp};

/// Magic bytes identifying a WAL record.
pub const WAL_MAGIC: [u8; 4] = *b"BWAL";

/// Current WAL format version.
pub const WAL_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
pub(crate) const HEADER_SIZE: usize = 11;

pub(crate) const CRC_SIZE: usize = 4;

const FLAG_TOMBSTONE: u8 = 0x01;

/// Type of WAL record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalRecordType {
    /// All writes of one committed transaction.
    Batch = 1,
    /// Everything at or below the timestamp is in segments.
    Checkpoint = 2,
}

impl WalRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Batch),
            2 => Some(Self::Checkpoint),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A record in the durability log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// One committed transaction. Every entry carries `commit_ts` as its
    /// version.
    Batch {
        /// Timestamp assigned at commit.
        commit_ts: Timestamp,
        /// The transaction's writes.
        entries: Vec<Entry>,
    },

    /// Marks that segments hold every commit up to `ts`.
    Checkpoint {
        /// Highest flushed commit timestamp.
        ts: Timestamp,
    },
}

impl WalRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> WalRecordType {
        match self {
            Self::Batch { .. } => WalRecordType::Batch,
            Self::Checkpoint { .. } => WalRecordType::Checkpoint,
        }
    }

    /// Largest payload the 4-byte length field can describe.
    pub const MAX_PAYLOAD_SIZE: usize = u32::MAX as usize;

    /// Serializes the record payload (without envelope).
    ///
    /// # Errors
    ///
    /// Fails with `InvalidArgument` if the payload would not fit the
    /// length field.
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        match self {
            Self::Batch { commit_ts, entries } => batch_payload(*commit_ts, entries),
            Self::Checkpoint { ts } => Ok(ts.as_u64().to_le_bytes().to_vec()),
        }
    }

    /// Deserializes a record from its type and payload.
    ///
    /// # Errors
    ///
    /// Fails with `WalCorruption` on short or over-long payloads.
    pub fn decode_payload(record_type: WalRecordType, payload: &[u8]) -> CoreResult<Self> {
        let short = || CoreError::wal_corruption("unexpected end of payload");
        let mut r = Reader::new(payload);

        let record = match record_type {
            WalRecordType::Batch => {
                let commit_ts = r.u64().ok_or_else(short)?;
                let count = r.u32().ok_or_else(short)? as usize;
                // Each entry needs at least 17 bytes; reject absurd counts
                // before allocating.
                if count > r.remaining() / 17 {
                    return Err(CoreError::wal_corruption(format!(
                        "batch claims {count} entries in {} bytes",
                        payload.len()
                    )));
                }

                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    let flags = r.u8().ok_or_else(short)?;
                    let expires_at = r.u64().ok_or_else(short)?;
                    let key = r.len_prefixed().ok_or_else(short)?.to_vec();
                    let value = r.len_prefixed().ok_or_else(short)?.to_vec();
                    entries.push(Entry {
                        key,
                        value,
                        version: commit_ts,
                        expires_at,
                        tombstone: flags & FLAG_TOMBSTONE != 0,
                    });
                }
                Self::Batch {
                    commit_ts: Timestamp::new(commit_ts),
                    entries,
                }
            }

            WalRecordType::Checkpoint => Self::Checkpoint {
                ts: Timestamp::new(r.u64().ok_or_else(short)?),
            },
        };

        if r.remaining() != 0 {
            return Err(CoreError::wal_corruption(format!(
                "trailing bytes in {:?} record: expected {} bytes, got {}",
                record_type,
                r.position(),
                payload.len()
            )));
        }

        Ok(record)
    }

    /// Serializes the record with its envelope:
    /// `magic | version | type | length | payload | crc32`.
    ///
    /// The CRC covers everything before it.
    ///
    /// # Errors
    ///
    /// Propagates payload encoding errors.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        envelope(self.record_type(), &self.encode_payload()?)
    }
}

/// Encodes a batch payload from borrowed entries.
///
/// Batch layout: `commit_ts u64 | count u32 | { flags u8 | expires_at u64
/// | key | value }*`, keys and values with `u32` length prefixes.
pub(crate) fn batch_payload(commit_ts: Timestamp, entries: &[Entry]) -> CoreResult<Vec<u8>> {
    let size: usize = entries
        .iter()
        .map(|e| 17 + e.key.len() + e.value.len())
        .sum::<usize>()
        + 12;
    if size > WalRecord::MAX_PAYLOAD_SIZE {
        return Err(CoreError::invalid_argument(format!(
            "batch of {size} bytes exceeds the WAL record limit"
        )));
    }
    let count = u32::try_from(entries.len())
        .map_err(|_| CoreError::invalid_argument("too many entries in one batch"))?;

    let mut buf = Vec::with_capacity(size);
    buf.extend_from_slice(&commit_ts.as_u64().to_le_bytes());
    buf.extend_from_slice(&count.to_le_bytes());
    for entry in entries {
        buf.push(if entry.tombstone { FLAG_TOMBSTONE } else { 0 });
        buf.extend_from_slice(&entry.expires_at.to_le_bytes());
        put_len_prefixed(&mut buf, &entry.key);
        put_len_prefixed(&mut buf, &entry.value);
    }
    Ok(buf)
}

/// Wraps a payload in `magic | version | type | length | payload | crc32`.
/// The CRC covers everything before it.
pub(crate) fn envelope(record_type: WalRecordType, payload: &[u8]) -> CoreResult<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| CoreError::invalid_argument("WAL record payload too large"))?;

    let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    data.extend_from_slice(&WAL_MAGIC);
    data.extend_from_slice(&WAL_VERSION.to_le_bytes());
    data.push(record_type.as_byte());
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(payload);

    let crc = compute_crc32(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    Ok(data)
}
