//! Dump-wal command implementation.

use crate::commands::{display_bytes, open_dir, Format};
use crate::error::CliResult;
use burrow_core::wal::{WalRecord, WalRecordIterator};
use burrow_storage::FileBackend;
use serde::Serialize;
use std::path::Path;

/// One log record, flattened for output.
#[derive(Debug, Serialize)]
pub struct WalRecordInfo {
    /// Log file id.
    pub wal: u64,
    /// Offset in the log file.
    pub offset: u64,
    /// Record type.
    pub record_type: &'static str,
    /// Commit or checkpoint timestamp.
    pub ts: u64,
    /// The batch's writes; empty for checkpoints.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<WalEntryInfo>,
}

/// One write inside a batch.
#[derive(Debug, Serialize)]
pub struct WalEntryInfo {
    /// `PUT` or `DELETE`.
    pub op: &'static str,
    /// Key as text or hex.
    pub key: String,
    /// Value length in bytes.
    pub value_size: usize,
    /// Expiry in Unix milliseconds, 0 for none.
    #[serde(skip_serializing_if = "is_zero")]
    pub expires_at: u64,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

/// Runs the dump-wal command.
pub fn run(path: &Path, wal: Option<u64>, limit: Option<usize>, format: Format) -> CliResult<()> {
    let records = read_records(path, wal, limit)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&records)?),
        Format::Text => print_text_output(&records),
    }
    Ok(())
}

/// Reads up to `limit` records from every log file, or only from `wal`.
pub fn read_records(
    path: &Path,
    wal: Option<u64>,
    limit: Option<usize>,
) -> CliResult<Vec<WalRecordInfo>> {
    let dir = open_dir(path)?;
    let max_records = limit.unwrap_or(usize::MAX);
    let ids: Vec<u64> = dir
        .wal_ids()?
        .into_iter()
        .filter(|id| wal.is_none_or(|only| only == *id))
        .collect();

    let mut records = Vec::new();
    for id in ids {
        if records.len() >= max_records {
            break;
        }
        let backend = FileBackend::open_existing(&dir.wal_path(id))?;
        let iter = WalRecordIterator::new(&backend, 0)?;
        for item in iter.take(max_records - records.len()) {
            let (offset, record) = item?;
            records.push(describe(id, offset, record));
        }
    }

    dir.release();
    Ok(records)
}

fn describe(wal: u64, offset: u64, record: WalRecord) -> WalRecordInfo {
    match record {
        WalRecord::Batch { commit_ts, entries } => WalRecordInfo {
            wal,
            offset,
            record_type: "BATCH",
            ts: commit_ts.as_u64(),
            entries: entries
                .into_iter()
                .map(|e| WalEntryInfo {
                    op: if e.tombstone { "DELETE" } else { "PUT" },
                    key: display_bytes(&e.key),
                    value_size: e.value.len(),
                    expires_at: e.expires_at,
                })
                .collect(),
        },
        WalRecord::Checkpoint { ts } => WalRecordInfo {
            wal,
            offset,
            record_type: "CHECKPOINT",
            ts: ts.as_u64(),
            entries: Vec::new(),
        },
    }
}

fn print_text_output(records: &[WalRecordInfo]) {
    for record in records {
        println!(
            "wal-{:06} @{:<8} {:<10} ts={}",
            record.wal, record.offset, record.record_type, record.ts
        );
        for entry in &record.entries {
            print!("    {:<6} {} ({} bytes)", entry.op, entry.key, entry.value_size);
            if entry.expires_at != 0 {
                print!(" expires_at={}", entry.expires_at);
            }
            println!();
        }
    }
    println!();
    println!("{} record(s)", records.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_core::{Config, Database};
    use std::time::Duration;

    fn unflushed_db(path: &Path) {
        let db = Database::open(path).unwrap();
        db.set(b"a", b"1".to_vec(), None).unwrap();
        db.set(b"b", b"22".to_vec(), Some(Duration::from_secs(60)))
            .unwrap();
        db.delete(b"a").unwrap();
        // Leave the batches in the log by copying the files while open.
        let copy = path.with_extension("copy");
        std::fs::create_dir_all(copy.join("SEGMENTS")).unwrap();
        for entry in std::fs::read_dir(path).unwrap() {
            let entry = entry.unwrap();
            let name = entry.file_name();
            if entry.path().is_file() && name != "LOCK" {
                std::fs::copy(entry.path(), copy.join(name)).unwrap();
            }
        }
        db.close().unwrap();
        std::fs::remove_dir_all(path).unwrap();
        std::fs::rename(copy, path).unwrap();
    }

    #[test]
    fn dumps_batches_in_commit_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        unflushed_db(&path);

        let records = read_records(&path, None, None).unwrap();
        let batches: Vec<_> = records
            .iter()
            .filter(|r| r.record_type == "BATCH")
            .collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].entries[0].op, "PUT");
        assert_eq!(batches[1].entries[0].key, "b");
        assert_eq!(batches[1].entries[0].value_size, 2);
        assert!(batches[1].entries[0].expires_at > 0);
        assert_eq!(batches[2].entries[0].op, "DELETE");
        assert!(batches.windows(2).all(|w| w[0].ts < w[1].ts));
    }

    #[test]
    fn limit_caps_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        unflushed_db(&path);

        assert_eq!(read_records(&path, None, Some(2)).unwrap().len(), 2);
        assert!(read_records(&path, Some(999), None).unwrap().is_empty());
    }

    #[test]
    fn closed_database_has_only_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let db = Database::open_with_config(&path, Config::new().background_work(false)).unwrap();
        db.set(b"k", b"v".to_vec(), None).unwrap();
        db.close().unwrap();

        let records = read_records(&path, None, None).unwrap();
        assert!(!records.is_empty());
        assert!(records.iter().all(|r| r.record_type == "CHECKPOINT"));
    }
}
