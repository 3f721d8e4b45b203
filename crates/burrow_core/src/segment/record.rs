//! Segment record encoding.

use crate::encoding::{compute_crc32, Reader};
use crate::error::{CoreError, CoreResult};
use crate::types::Entry;

/// Magic bytes at the start of every segment file.
pub const SEGMENT_MAGIC: [u8; 4] = *b"BSEG";

/// Current segment format version.
pub const SEGMENT_VERSION: u16 = 1;

/// Bytes before the first record: magic + version.
pub(crate) const FILE_HEADER_SIZE: usize = 6;

/// Flags for segment records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentRecordFlags(u8);

impl SegmentRecordFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// The record deletes its key.
    pub const TOMBSTONE: Self = Self(0x01);

    /// Creates flags from a raw byte.
    #[must_use]
    pub const fn from_byte(b: u8) -> Self {
        Self(b)
    }

    /// Returns the raw byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self.0
    }

    /// Checks if the tombstone flag is set.
    #[must_use]
    pub const fn is_tombstone(self) -> bool {
        self.0 & Self::TOMBSTONE.0 != 0
    }
}

/// Encoding of one entry inside a segment file.
///
/// ```text
/// | record_len (4) | flags (1) | version (8) | expires_at (8) | key_len (4) | key | value | crc32 (4) |
/// ```
///
/// `record_len` counts the whole record including itself and the CRC.
pub struct SegmentRecord;

impl SegmentRecord {
    /// Fixed bytes before the key.
    pub const HEADER_SIZE: usize = 25;
    /// CRC size.
    pub const CRC_SIZE: usize = 4;

    /// Size of `entry` once encoded.
    #[must_use]
    pub fn encoded_size(entry: &Entry) -> usize {
        Self::HEADER_SIZE + entry.key.len() + entry.value.len() + Self::CRC_SIZE
    }

    /// Encodes one entry.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidArgument` if the record would not fit the
    /// 4-byte length field.
    pub fn encode(entry: &Entry) -> CoreResult<Vec<u8>> {
        let record_len = u32::try_from(Self::encoded_size(entry))
            .map_err(|_| CoreError::invalid_argument("segment record too large"))?;
        let key_len = u32::try_from(entry.key.len())
            .map_err(|_| CoreError::invalid_argument("key too large"))?;

        let flags = if entry.tombstone {
            SegmentRecordFlags::TOMBSTONE
        } else {
            SegmentRecordFlags::NONE
        };

        let mut buf = Vec::with_capacity(record_len as usize);
        buf.extend_from_slice(&record_len.to_le_bytes());
        buf.push(flags.as_byte());
        buf.extend_from_slice(&entry.version.to_le_bytes());
        buf.extend_from_slice(&entry.expires_at.to_le_bytes());
        buf.extend_from_slice(&key_len.to_le_bytes());
        buf.extend_from_slice(&entry.key);
        buf.extend_from_slice(&entry.value);

        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Reads the length prefix of the record starting at `data[0]`.
    #[must_use]
    pub fn peek_len(data: &[u8]) -> Option<usize> {
        Reader::new(data).u32().map(|len| len as usize)
    }

    /// Decodes exactly one record.
    ///
    /// # Errors
    ///
    /// `ChecksumMismatch` on a bad CRC, `SegmentCorruption` on any
    /// structural problem.
    pub fn decode(data: &[u8]) -> CoreResult<Entry> {
        let corrupt = |what: &str| CoreError::segment_corruption(what.to_string());

        if data.len() < Self::HEADER_SIZE + Self::CRC_SIZE {
            return Err(corrupt("record too short"));
        }
        let record_len = Self::peek_len(data).ok_or_else(|| corrupt("record too short"))?;
        if record_len != data.len() {
            return Err(CoreError::segment_corruption(format!(
                "record length {record_len} does not match {} available bytes",
                data.len()
            )));
        }

        let (body, trailer) = data.split_at(record_len - Self::CRC_SIZE);
        let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let computed = compute_crc32(body);
        if stored != computed {
            return Err(CoreError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }

        let mut r = Reader::new(&body[4..]);
        let flags = SegmentRecordFlags::from_byte(r.u8().ok_or_else(|| corrupt("flags"))?);
        let version = r.u64().ok_or_else(|| corrupt("version"))?;
        let expires_at = r.u64().ok_or_else(|| corrupt("expires_at"))?;
        let key_len = r.u32().ok_or_else(|| corrupt("key length"))? as usize;
        let key = r.bytes(key_len).ok_or_else(|| corrupt("key overruns record"))?;
        let value = r.bytes(r.remaining()).unwrap_or_default();

        Ok(Entry {
            key: key.to_vec(),
            value: value.to_vec(),
            version,
            expires_at,
            tombstone: flags.is_tombstone(),
        })
    }

    /// The file header written before the first record.
    #[must_use]
    pub fn file_header() -> [u8; FILE_HEADER_SIZE] {
        let mut header = [0u8; FILE_HEADER_SIZE];
        header[..4].copy_from_slice(&SEGMENT_MAGIC);
        header[4..].copy_from_slice(&SEGMENT_VERSION.to_le_bytes());
        header
    }

    /// Validates a file header.
    ///
    /// # Errors
    ///
    /// `SegmentCorruption` on bad magic, `InvalidFormat` on a future
    /// version.
    pub fn check_file_header(data: &[u8]) -> CoreResult<()> {
        if data.len() < FILE_HEADER_SIZE || data[..4] != SEGMENT_MAGIC {
            return Err(CoreError::segment_corruption("invalid segment magic"));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version > SEGMENT_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported segment version: {version}"
            )));
        }
        Ok(())
    }
}
