//! Inspect command implementation.
//!
//! Reads the manifest, log files and segments directly, without opening
//! the database, so nothing is replayed or flushed.

use crate::commands::{format_size, open_dir, Format};
use crate::error::{CliError, CliResult};
use burrow_core::segment::Segment;
use burrow_core::wal::{WalRecord, WalRecordIterator};
use burrow_core::{is_expired, now_millis, DatabaseDir};
use burrow_storage::{FileBackend, StorageBackend};
use serde::Serialize;
use std::path::Path;

/// Database inspection result.
#[derive(Debug, Serialize)]
pub struct InspectReport {
    /// Database path.
    pub path: String,
    /// Highest commit timestamp held in segments.
    pub flushed_ts: u64,
    /// Next segment id the manifest will assign.
    pub next_segment_id: u64,
    /// Next log id the manifest will assign.
    pub next_wal_id: u64,
    /// Log files, ascending by id.
    pub wal_files: Vec<WalFileInfo>,
    /// Live segments, oldest first.
    pub segments: Vec<SegmentInfo>,
    /// Total size of logs and segments in bytes.
    pub total_size: u64,
}

/// One log file.
#[derive(Debug, Serialize)]
pub struct WalFileInfo {
    /// File id.
    pub id: u64,
    /// Size in bytes.
    pub size: u64,
    /// Committed batches.
    pub batches: usize,
    /// Checkpoint markers.
    pub checkpoints: usize,
    /// Highest commit timestamp in the file.
    pub max_ts: u64,
    /// Whether the file ends in a partial record.
    pub torn_tail: bool,
}

/// One segment file.
#[derive(Debug, Serialize)]
pub struct SegmentInfo {
    /// Segment id.
    pub id: u64,
    /// Size in bytes.
    pub size: u64,
    /// Versions stored.
    pub records: usize,
    /// Deletion markers.
    pub tombstones: usize,
    /// Versions whose expiry has passed.
    pub expired: usize,
    /// Highest version stored.
    pub max_version: u64,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: Format) -> CliResult<()> {
    let report = inspect(path)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text => print_text_output(&report),
    }
    Ok(())
}

/// Collects the report for the database at `path`.
pub fn inspect(path: &Path) -> CliResult<InspectReport> {
    let dir = open_dir(path)?;
    let report = build_report(&dir);
    dir.release();
    report
}

fn build_report(dir: &DatabaseDir) -> CliResult<InspectReport> {
    let wal_ids = dir.wal_ids()?;
    let manifest = match dir.load_manifest()? {
        Some(manifest) => manifest,
        None if wal_ids.is_empty() => return Err(CliError::NotFound(dir.path().to_path_buf())),
        None => burrow_core::Manifest::new(),
    };

    let mut report = InspectReport {
        path: dir.path().display().to_string(),
        flushed_ts: manifest.flushed_ts.as_u64(),
        next_segment_id: manifest.next_segment_id,
        next_wal_id: manifest.next_wal_id,
        wal_files: Vec::with_capacity(wal_ids.len()),
        segments: Vec::with_capacity(manifest.segments.len()),
        total_size: 0,
    };

    for id in wal_ids {
        let backend = FileBackend::open_existing(&dir.wal_path(id))?;
        let info = analyze_wal(id, &backend)?;
        report.total_size += info.size;
        report.wal_files.push(info);
    }

    let now = now_millis();
    for &id in &manifest.segments {
        let backend = FileBackend::open_existing(&dir.segment_path(id))?;
        let segment = Segment::open(id, Box::new(backend))?;
        let mut info = SegmentInfo {
            id,
            size: segment.size()?,
            records: segment.len(),
            tombstones: 0,
            expired: 0,
            max_version: segment.max_version(),
        };
        for entry in segment.entries()? {
            if entry.tombstone {
                info.tombstones += 1;
            } else if is_expired(entry.expires_at, now) {
                info.expired += 1;
            }
        }
        report.total_size += info.size;
        report.segments.push(info);
    }

    Ok(report)
}

fn analyze_wal(id: u64, backend: &dyn StorageBackend) -> CliResult<WalFileInfo> {
    let mut info = WalFileInfo {
        id,
        size: backend.size()?,
        batches: 0,
        checkpoints: 0,
        max_ts: 0,
        torn_tail: false,
    };
    let mut iter = WalRecordIterator::new(backend, 0)?;
    for item in iter.by_ref() {
        match item?.1 {
            WalRecord::Batch { commit_ts, .. } => {
                info.batches += 1;
                info.max_ts = info.max_ts.max(commit_ts.as_u64());
            }
            WalRecord::Checkpoint { .. } => info.checkpoints += 1,
        }
    }
    info.torn_tail = iter.is_torn();
    Ok(info)
}

fn print_text_output(report: &InspectReport) {
    println!("Burrow Database Inspection");
    println!("==========================");
    println!();
    println!("Path:            {}", report.path);
    println!("Flushed through: ts {}", report.flushed_ts);
    println!("Total size:      {}", format_size(report.total_size));
    println!();

    println!("Logs ({}):", report.wal_files.len());
    for wal in &report.wal_files {
        println!(
            "  wal-{:06}  {:>10}  {} batches, {} checkpoints, max ts {}{}",
            wal.id,
            format_size(wal.size),
            wal.batches,
            wal.checkpoints,
            wal.max_ts,
            if wal.torn_tail { "  (torn tail)" } else { "" }
        );
    }
    println!();

    println!("Segments ({}):", report.segments.len());
    for seg in &report.segments {
        println!(
            "  seg-{:06}  {:>10}  {} records, {} tombstones, {} expired, max version {}",
            seg.id,
            format_size(seg.size),
            seg.records,
            seg.tombstones,
            seg.expired,
            seg.max_version
        );
    }
}
