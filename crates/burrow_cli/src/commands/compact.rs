//! Compact command implementation.

use crate::commands::{with_database, Format};
use crate::error::CliResult;
use burrow_core::segment::CompactionResult;
use serde::Serialize;
use std::path::Path;

/// What a compaction run did.
#[derive(Debug, Default, Serialize)]
pub struct CompactReport {
    /// Segments before the run.
    pub segments_before: u64,
    /// Segments after the run.
    pub segments_after: u64,
    /// Versions read by the merge.
    pub input_records: usize,
    /// Versions written by the merge.
    pub output_records: usize,
    /// Tombstones dropped.
    pub tombstones_removed: usize,
    /// Expired versions dropped.
    pub expired_removed: usize,
    /// Shadowed versions dropped.
    pub obsolete_versions_removed: usize,
    /// Encoded bytes saved.
    pub bytes_saved: usize,
}

/// Runs the compact command.
pub fn run(path: &Path, format: Format) -> CliResult<()> {
    let report = compact(path)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text => print_text_output(path, &report),
    }
    Ok(())
}

/// Flushes the memtable, then merges every segment into one.
pub fn compact(path: &Path) -> CliResult<CompactReport> {
    with_database(path, false, |db| {
        db.flush()?;
        let segments_before = db.stats().segments;
        let result = db.compact()?;
        let mut report = result.map(from_result).unwrap_or_default();
        report.segments_before = segments_before;
        report.segments_after = db.stats().segments;
        Ok(report)
    })
}

fn from_result(result: CompactionResult) -> CompactReport {
    CompactReport {
        input_records: result.input_records,
        output_records: result.output_records,
        tombstones_removed: result.tombstones_removed,
        expired_removed: result.expired_removed,
        obsolete_versions_removed: result.obsolete_versions_removed,
        bytes_saved: result.bytes_saved,
        ..CompactReport::default()
    }
}

fn print_text_output(path: &Path, report: &CompactReport) {
    println!("Compacted segments at {}", path.display());
    println!();
    println!(
        "  Segments:          {} -> {}",
        report.segments_before, report.segments_after
    );
    println!("  Input records:     {}", report.input_records);
    println!("  Output records:    {}", report.output_records);
    println!("  Tombstones:        {} removed", report.tombstones_removed);
    println!("  Expired:           {} removed", report.expired_removed);
    println!(
        "  Obsolete versions: {} removed",
        report.obsolete_versions_removed
    );
    println!("  Space saved:       {} bytes", report.bytes_saved);
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_core::{Config, Database};

    #[test]
    fn compaction_drops_overwritten_versions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");

        let db = Database::open_with_config(&path, Config::new().background_work(false)).unwrap();
        for round in 0..3u8 {
            db.set(b"k", vec![round], None).unwrap();
            db.set(b"gone", vec![round], None).unwrap();
            db.flush().unwrap();
        }
        db.delete(b"gone").unwrap();
        db.close().unwrap();

        let report = compact(&path).unwrap();
        assert!(report.segments_before >= 3);
        assert_eq!(report.segments_after, 1);
        assert_eq!(report.output_records, 1);
        assert!(report.tombstones_removed >= 1);

        let db = Database::open(&path).unwrap();
        assert_eq!(db.get(b"k").unwrap(), vec![2]);
        assert!(db.get(b"gone").is_err());
        db.close().unwrap();
    }

    #[test]
    fn empty_database_compacts_to_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        Database::open(&path).unwrap().close().unwrap();

        let report = compact(&path).unwrap();
        assert_eq!(report.segments_after, 0);
        assert_eq!(report.input_records, 0);
    }
}
