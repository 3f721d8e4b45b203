//! Fuzz testing harnesses for Burrow.
//!
//! Each target takes arbitrary bytes and must never panic. They can be
//! driven by cargo-fuzz or, as in this crate's tests, by proptest.

use burrow_core::segment::{Segment, SegmentRecord};
use burrow_core::wal::{WalRecord, WalRecordIterator, WalRecordType};
use burrow_core::{Config, Database, Manifest};
use burrow_storage::InMemoryBackend;
use std::time::Duration;

/// Fuzz target for a whole log file.
///
/// Iterates until the first error or the end; a torn tail must be
/// reported, not panicked on.
pub fn fuzz_wal_log(data: &[u8]) {
    let backend = InMemoryBackend::with_data(data.to_vec());
    let Ok(mut iter) = WalRecordIterator::new(&backend, 0) else {
        return;
    };
    for item in iter.by_ref() {
        if item.is_err() {
            return;
        }
    }
    assert!(iter.valid_end() <= data.len() as u64);
}

/// Fuzz target for log record payloads of every type.
pub fn fuzz_wal_payload(data: &[u8]) {
    for record_type in [WalRecordType::Batch, WalRecordType::Checkpoint] {
        let _ = WalRecord::decode_payload(record_type, data);
    }
}

/// Fuzz target for a single segment record.
pub fn fuzz_segment_record(data: &[u8]) {
    let _ = SegmentRecord::decode(data);
}

/// Fuzz target for a whole segment file.
pub fn fuzz_segment_file(data: &[u8]) {
    if let Ok(segment) = Segment::open(1, Box::new(InMemoryBackend::with_data(data.to_vec()))) {
        // Anything that opened must read back.
        let _ = segment.entries();
    }
}

/// Fuzz target for the manifest.
pub fn fuzz_manifest(data: &[u8]) {
    if let Ok(manifest) = Manifest::decode(data) {
        assert_eq!(Manifest::decode(&manifest.encode()).ok(), Some(manifest));
    }
}

/// Structured fuzzing input for database operations.
#[derive(Debug, Clone)]
pub enum FuzzOp {
    /// Store a value.
    Set {
        /// Key, possibly empty.
        key: Vec<u8>,
        /// Value.
        value: Vec<u8>,
        /// TTL in milliseconds; zero or less means none.
        ttl_ms: i8,
    },
    /// Read a key.
    Get {
        /// Key, possibly empty.
        key: Vec<u8>,
    },
    /// Delete a key.
    Delete {
        /// Key, possibly empty.
        key: Vec<u8>,
    },
    /// Write several keys in one transaction.
    Batch {
        /// Keys to write.
        keys: Vec<Vec<u8>>,
    },
    /// Flush the memtable.
    Flush,
    /// Merge segments.
    Compact,
}

impl FuzzOp {
    /// Parse operations from fuzzer input.
    pub fn parse_sequence(data: &[u8]) -> Vec<FuzzOp> {
        let mut ops = Vec::new();
        let mut input = data;

        while let Some((&op_type, rest)) = input.split_first() {
            input = rest;
            let op = match op_type % 6 {
                0 => {
                    let Some(key) = take_sized(&mut input) else { break };
                    let Some(value) = take_sized(&mut input) else { break };
                    let Some((&ttl, rest)) = input.split_first() else { break };
                    input = rest;
                    FuzzOp::Set {
                        key,
                        value,
                        ttl_ms: ttl as i8,
                    }
                }
                1 => match take_sized(&mut input) {
                    Some(key) => FuzzOp::Get { key },
                    None => break,
                },
                2 => match take_sized(&mut input) {
                    Some(key) => FuzzOp::Delete { key },
                    None => break,
                },
                3 => {
                    let Some((&count, rest)) = input.split_first() else { break };
                    input = rest;
                    let keys: Vec<_> = (0..count % 8).map_while(|_| take_sized(&mut input)).collect();
                    FuzzOp::Batch { keys }
                }
                4 => FuzzOp::Flush,
                _ => FuzzOp::Compact,
            };
            ops.push(op);
        }

        ops
    }

    /// Runs `ops` against `db`, ignoring errors; only panics are bugs.
    pub fn execute_sequence(ops: &[FuzzOp], db: &Database) {
        for op in ops {
            match op {
                FuzzOp::Set { key, value, ttl_ms } => {
                    let ttl = burrow_core::ttl_from_millis(i64::from(*ttl_ms));
                    let _ = db.set(key, value.clone(), ttl);
                }
                FuzzOp::Get { key } => {
                    let _ = db.get(key);
                }
                FuzzOp::Delete { key } => {
                    let _ = db.delete(key);
                }
                FuzzOp::Batch { keys } => {
                    let _ = db.update(|txn| {
                        for key in keys {
                            txn.set(key, key.clone(), Some(Duration::from_secs(60)))?;
                        }
                        Ok(())
                    });
                }
                FuzzOp::Flush => {
                    let _ = db.flush();
                }
                FuzzOp::Compact => {
                    let _ = db.compact();
                }
            }
        }
    }
}

/// Takes a length byte (mod 16) and that many bytes.
fn take_sized(input: &mut &[u8]) -> Option<Vec<u8>> {
    let (&len, rest) = input.split_first()?;
    let len = usize::from(len % 16);
    if rest.len() < len {
        return None;
    }
    let (bytes, rest) = rest.split_at(len);
    *input = rest;
    Some(bytes.to_vec())
}

/// Fuzz target for database operations.
pub fn fuzz_database_operations(data: &[u8]) {
    let ops = FuzzOp::parse_sequence(data);
    if ops.is_empty() {
        return;
    }
    let config = Config::new()
        .in_memory(true)
        .background_work(false)
        .memtable_size(128)
        .merge_trigger(2);
    let Ok(db) = Database::open_with_config("", config) else {
        return;
    };
    FuzzOp::execute_sequence(&ops, &db);
    assert!(db.close().is_ok());
}
