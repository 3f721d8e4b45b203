//! Verify command implementation.

use crate::commands::open_dir;
use crate::error::{CliError, CliResult};
use burrow_core::segment::Segment;
use burrow_core::wal::WalRecordIterator;
use burrow_core::DatabaseDir;
use burrow_storage::FileBackend;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyReport {
    /// Log records whose checksum matched.
    pub wal_records: usize,
    /// Segment records whose checksum matched.
    pub segment_records: usize,
    /// Damage that would stop the database from opening.
    pub errors: Vec<String>,
    /// Recoverable findings, such as a torn log tail.
    pub warnings: Vec<String>,
}

impl VerifyReport {
    /// Whether no errors were found.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path, check_wal: bool, check_segments: bool) -> CliResult<()> {
    println!("Verifying database at {}", path.display());
    println!();

    let report = verify(path, check_wal, check_segments)?;

    if check_wal {
        println!("Log records checked:     {}", report.wal_records);
    }
    if check_segments {
        println!("Segment records checked: {}", report.segment_records);
    }
    for warning in &report.warnings {
        println!("  warning: {warning}");
    }
    for error in &report.errors {
        println!("  error:   {error}");
    }

    println!();
    if report.is_ok() {
        println!("Database verification passed");
        Ok(())
    } else {
        println!("Database verification failed");
        Err(CliError::VerificationFailed(report.errors.len()))
    }
}

/// Checks every record checksum in the selected files.
pub fn verify(path: &Path, check_wal: bool, check_segments: bool) -> CliResult<VerifyReport> {
    let dir = open_dir(path)?;
    let mut report = VerifyReport::default();
    if check_wal {
        verify_wal(&dir, &mut report)?;
    }
    if check_segments {
        verify_segments(&dir, &mut report)?;
    }
    dir.release();
    Ok(report)
}

fn verify_wal(dir: &DatabaseDir, report: &mut VerifyReport) -> CliResult<()> {
    for id in dir.wal_ids()? {
        let backend = FileBackend::open_existing(&dir.wal_path(id))?;
        let mut iter = WalRecordIterator::new(&backend, 0)?;
        let mut failed = false;
        for item in iter.by_ref() {
            match item {
                Ok(_) => report.wal_records += 1,
                Err(err) => {
                    // Record lengths after a bad record cannot be trusted.
                    report.errors.push(format!("wal-{id:06}: {err}"));
                    failed = true;
                    break;
                }
            }
        }
        if !failed && iter.is_torn() {
            report.warnings.push(format!(
                "wal-{id:06}: partial record at offset {} will be truncated on open",
                iter.valid_end()
            ));
        }
    }
    Ok(())
}

fn verify_segments(dir: &DatabaseDir, report: &mut VerifyReport) -> CliResult<()> {
    let manifest = match dir.load_manifest() {
        Ok(Some(manifest)) => manifest,
        Ok(None) => return Ok(()),
        Err(err) => {
            report.errors.push(format!("MANIFEST: {err}"));
            return Ok(());
        }
    };

    for &id in &manifest.segments {
        let path = dir.segment_path(id);
        if !path.exists() {
            report.errors.push(format!("seg-{id:06}: listed in manifest but missing"));
            continue;
        }
        let backend = FileBackend::open_existing(&path)?;
        match Segment::open(id, Box::new(backend)).and_then(|seg| seg.entries()) {
            Ok(entries) => report.segment_records += entries.len(),
            Err(err) => report.errors.push(format!("seg-{id:06}: {err}")),
        }
    }

    for id in dir.segment_ids()? {
        if !manifest.segments.contains(&id) {
            report.warnings.push(format!(
                "seg-{id:06}: not in manifest, will be removed on open"
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_core::Database;
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write};

    fn closed_db(path: &Path) {
        let db = Database::open(path).unwrap();
        for i in 0..10u8 {
            db.set(&[b'k', i], vec![i; 16], None).unwrap();
        }
        db.close().unwrap();
    }

    #[test]
    fn clean_database_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        closed_db(&path);

        let report = verify(&path, true, true).unwrap();
        assert!(report.is_ok(), "{:?}", report.errors);
        assert_eq!(report.segment_records, 10);
        assert!(report.wal_records >= 1);
    }

    #[test]
    fn flipped_segment_byte_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        closed_db(&path);

        let seg = std::fs::read_dir(path.join("SEGMENTS"))
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        let len = std::fs::metadata(&seg).unwrap().len();
        let mut file = OpenOptions::new().read(true).write(true).open(&seg).unwrap();
        file.seek(SeekFrom::Start(len - 6)).unwrap();
        file.write_all(&[0xAA]).unwrap();
        drop(file);

        let report = verify(&path, false, true).unwrap();
        assert!(!report.is_ok());
        assert!(report.errors[0].starts_with("seg-"));
    }

    #[test]
    fn torn_log_tail_is_only_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        closed_db(&path);

        let wal = std::fs::read_dir(&path)
            .unwrap()
            .map(|e| e.unwrap().path())
            .find(|p| p.extension().is_some_and(|ext| ext == "log"))
            .unwrap();
        let mut file = OpenOptions::new().append(true).open(&wal).unwrap();
        file.write_all(b"BWAL\x01").unwrap();
        drop(file);

        let report = verify(&path, true, false).unwrap();
        assert!(report.is_ok());
        assert_eq!(report.warnings.len(), 1);
    }
}
