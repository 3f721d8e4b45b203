//! Database manifest.
//!
//! The manifest names the segment files that make up the database and
//! the highest commit timestamp they contain. It is rewritten atomically
//! after every flush or merge.

use crate::encoding::{compute_crc32, Reader};
use crate::error::{CoreError, CoreResult};
use crate::types::Timestamp;

/// Magic bytes for manifest file.
pub const MANIFEST_MAGIC: [u8; 4] = *b"BMFN";

/// Current manifest version.
pub const MANIFEST_VERSION: u16 = 1;

/// Persistent database metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Live segment ids, oldest first.
    pub segments: Vec<u64>,
    /// Every commit at or below this timestamp is in a segment.
    pub flushed_ts: Timestamp,
    /// Next segment id to assign.
    pub next_segment_id: u64,
    /// Next log file id to assign.
    pub next_wal_id: u64,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            segments: Vec::new(),
            flushed_ts: Timestamp::ZERO,
            next_segment_id: 1,
            next_wal_id: 1,
        }
    }
}

impl Manifest {
    /// Creates a manifest for an empty database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the next segment id.
    pub fn allocate_segment_id(&mut self) -> u64 {
        let id = self.next_segment_id;
        self.next_segment_id += 1;
        id
    }

    /// Reserves the next log file id.
    pub fn allocate_wal_id(&mut self) -> u64 {
        let id = self.next_wal_id;
        self.next_wal_id += 1;
        id
    }

    /// Encodes the manifest to bytes.
    ///
    /// Layout: `magic | version u16 | flushed_ts u64 | next_segment_id u64
    /// | next_wal_id u64 | count u32 | segment ids u64* | crc32`.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(34 + self.segments.len() * 8 + 4);
        buf.extend_from_slice(&MANIFEST_MAGIC);
        buf.extend_from_slice(&MANIFEST_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.flushed_ts.as_u64().to_le_bytes());
        buf.extend_from_slice(&self.next_segment_id.to_le_bytes());
        buf.extend_from_slice(&self.next_wal_id.to_le_bytes());

        let count = u32::try_from(self.segments.len()).unwrap_or(u32::MAX);
        buf.extend_from_slice(&count.to_le_bytes());
        for id in &self.segments {
            buf.extend_from_slice(&id.to_le_bytes());
        }

        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes a manifest from bytes.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidFormat` on bad magic, an unknown version or a
    /// short buffer, and with `ChecksumMismatch` if the trailer is wrong.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < 4 || data[0..4] != MANIFEST_MAGIC {
            return Err(CoreError::invalid_format("invalid manifest magic"));
        }
        if data.len() < 4 + 2 + 4 {
            return Err(CoreError::invalid_format("manifest too short"));
        }

        let (body, trailer) = data.split_at(data.len() - 4);
        let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let computed = compute_crc32(body);
        if stored != computed {
            return Err(CoreError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }

        let short = || CoreError::invalid_format("manifest too short");
        let mut r = Reader::new(&body[4..]);

        let version = r.u16().ok_or_else(short)?;
        if version > MANIFEST_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported manifest version: {version}"
            )));
        }

        let flushed_ts = Timestamp::new(r.u64().ok_or_else(short)?);
        let next_segment_id = r.u64().ok_or_else(short)?;
        let next_wal_id = r.u64().ok_or_else(short)?;
        let count = r.u32().ok_or_else(short)? as usize;
        if count > r.remaining() / 8 {
            return Err(short());
        }
        let segments = (0..count)
            .map(|_| r.u64().ok_or_else(short))
            .collect::<CoreResult<Vec<_>>>()?;

        Ok(Self {
            segments,
            flushed_ts,
            next_segment_id,
            next_wal_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_manifest() {
        let manifest = Manifest::new();
        assert!(manifest.segments.is_empty());
        assert_eq!(manifest.flushed_ts, Timestamp::ZERO);
        assert_eq!(manifest.next_segment_id, 1);
        assert_eq!(manifest.next_wal_id, 1);
    }

    #[test]
    fn ids_are_never_reused() {
        let mut manifest = Manifest::default();
        assert_eq!(manifest.allocate_segment_id(), 1);
        assert_eq!(manifest.allocate_segment_id(), 2);
        assert_eq!(manifest.allocate_wal_id(), 1);
        assert_eq!(manifest.allocate_wal_id(), 2);
        assert_eq!(manifest.next_segment_id, 3);
    }

    #[test]
    fn encode_decode_preserves_fields() {
        let manifest = Manifest {
            segments: vec![3, 7, 8],
            flushed_ts: Timestamp::new(42),
            next_segment_id: 9,
            next_wal_id: 5,
        };
        let decoded = Manifest::decode(&manifest.encode()).unwrap();
        assert_eq!(decoded, manifest);
    }

    #[test]
    fn invalid_magic_rejected() {
        assert!(matches!(
            Manifest::decode(b"XXXX"),
            Err(CoreError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn flipped_bit_fails_checksum() {
        let mut data = Manifest::default().encode();
        data[8] ^= 0x01;
        assert!(matches!(
            Manifest::decode(&data),
            Err(CoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn future_version_rejected() {
        let mut data = Manifest::default().encode();
        data[4..6].copy_from_slice(&(MANIFEST_VERSION + 1).to_le_bytes());
        let body_len = data.len() - 4;
        let crc = compute_crc32(&data[..body_len]);
        data[body_len..].copy_from_slice(&crc.to_le_bytes());
        assert!(matches!(
            Manifest::decode(&data),
            Err(CoreError::InvalidFormat { .. })
        ));
    }
}
