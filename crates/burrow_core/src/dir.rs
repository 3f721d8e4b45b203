//! Database directory management.
//!
//! ```text
//! <db_path>/
//! ├─ LOCK                 # Advisory lock, held while the database is open
//! ├─ MANIFEST             # Segment list, flushed timestamp, next ids
//! ├─ wal-000001.log       # Write-ahead logs, one per memtable
//! └─ SEGMENTS/
//!    └─ seg-000001.dat    # Immutable sorted segments
//! ```

use crate::error::{CoreError, CoreResult};
use crate::manifest::Manifest;
use burrow_storage::{FileBackend, InMemoryBackend, StorageBackend};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

const MANIFEST_FILE: &str = "MANIFEST";
const MANIFEST_TEMP: &str = "MANIFEST.tmp";
const LOCK_FILE: &str = "LOCK";
const SEGMENTS_DIR: &str = "SEGMENTS";
const WAL_PREFIX: &str = "wal-";
const WAL_SUFFIX: &str = ".log";
const SEGMENT_PREFIX: &str = "seg-";
const SEGMENT_SUFFIX: &str = ".dat";

/// An open, locked database directory.
///
/// Only one `DatabaseDir` can hold a given directory at a time, across
/// processes. The lock is released by [`DatabaseDir::release`] or on drop.
#[derive(Debug)]
pub struct DatabaseDir {
    path: PathBuf,
    lock_file: Mutex<Option<File>>,
}

impl DatabaseDir {
    /// Opens or creates a database directory and takes its lock.
    ///
    /// # Errors
    ///
    /// - `InvalidFormat` if the directory is missing and
    ///   `create_if_missing` is false, or the path is not a directory
    /// - `DatabaseLocked` if another handle holds the lock
    /// - `Io` on file system errors
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "database directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        fs::create_dir_all(path.join(SEGMENTS_DIR))?;

        Ok(Self {
            path: path.to_path_buf(),
            lock_file: Mutex::new(Some(lock_file)),
        })
    }

    /// Returns the database directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of log file `id`.
    #[must_use]
    pub fn wal_path(&self, id: u64) -> PathBuf {
        self.path.join(format!("{WAL_PREFIX}{id:06}{WAL_SUFFIX}"))
    }

    /// Path of segment file `id`.
    #[must_use]
    pub fn segment_path(&self, id: u64) -> PathBuf {
        self.path
            .join(SEGMENTS_DIR)
            .join(format!("{SEGMENT_PREFIX}{id:06}{SEGMENT_SUFFIX}"))
    }

    /// Path of the MANIFEST file.
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.path.join(MANIFEST_FILE)
    }

    /// Lists the ids of the log files present, ascending.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be read.
    pub fn wal_ids(&self) -> CoreResult<Vec<u64>> {
        list_ids(&self.path, WAL_PREFIX, WAL_SUFFIX)
    }

    /// Lists the ids of the segment files present, ascending.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be read.
    pub fn segment_ids(&self) -> CoreResult<Vec<u64>> {
        list_ids(&self.path.join(SEGMENTS_DIR), SEGMENT_PREFIX, SEGMENT_SUFFIX)
    }

    /// Loads the manifest, or `None` for a new database.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors or a malformed manifest.
    pub fn load_manifest(&self) -> CoreResult<Option<Manifest>> {
        let manifest_path = self.manifest_path();
        if !manifest_path.exists() {
            return Ok(None);
        }

        let data = fs::read(&manifest_path)?;
        if data.is_empty() {
            return Ok(None);
        }
        Manifest::decode(&data).map(Some)
    }

    /// Saves the manifest atomically: write a temp file, fsync it, rename
    /// it over MANIFEST, fsync the directory.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors; the previous manifest stays in place.
    pub fn save_manifest(&self, manifest: &Manifest) -> CoreResult<()> {
        let temp_path = self.path.join(MANIFEST_TEMP);

        let mut file = File::create(&temp_path)?;
        file.write_all(&manifest.encode())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.manifest_path())?;
        sync_directory(&self.path)
    }

    /// Deletes log file `id` if present.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be removed.
    pub fn remove_wal(&self, id: u64) -> CoreResult<()> {
        remove_if_exists(&self.wal_path(id))?;
        sync_directory(&self.path)
    }

    /// Deletes segment file `id` if present.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be removed.
    pub fn remove_segment(&self, id: u64) -> CoreResult<()> {
        remove_if_exists(&self.segment_path(id))?;
        sync_directory(&self.path.join(SEGMENTS_DIR))
    }

    /// Releases the directory lock. Idempotent.
    pub fn release(&self) {
        if let Some(file) = self.lock_file.lock().take() {
            if let Err(err) = FileExt::unlock(&file) {
                warn!(path = %self.path.display(), error = %err, "failed to unlock database directory");
            }
        }
    }
}

impl Drop for DatabaseDir {
    fn drop(&mut self) {
        self.release();
    }
}

fn list_ids(dir: &Path, prefix: &str, suffix: &str) -> CoreResult<Vec<u64>> {
    let mut ids = Vec::new();
    for dir_entry in fs::read_dir(dir)? {
        let name = dir_entry?.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(id) = name
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(suffix))
            .and_then(|digits| digits.parse::<u64>().ok())
        {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

fn remove_if_exists(path: &Path) -> CoreResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Makes creates, renames and deletes in `dir` durable.
#[cfg(unix)]
fn sync_directory(dir: &Path) -> CoreResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> CoreResult<()> {
    // NTFS journals metadata; directories cannot be fsynced on Windows.
    Ok(())
}

/// Where a database keeps its files.
///
/// The engine asks the layout for backends by id and never touches paths
/// itself, so in-memory and on-disk databases share one code path.
#[derive(Debug)]
pub enum StorageLayout {
    /// Files in a locked directory.
    Disk(DatabaseDir),
    /// Heap buffers; nothing survives the process.
    Memory,
}

impl StorageLayout {
    /// Whether this layout persists nothing.
    #[must_use]
    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Memory)
    }

    /// The directory, for on-disk layouts.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Disk(dir) => Some(dir.path()),
            Self::Memory => None,
        }
    }

    /// Opens (creating if missing) log file `id`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened.
    pub fn open_wal(&self, id: u64) -> CoreResult<Box<dyn StorageBackend>> {
        match self {
            Self::Disk(dir) => Ok(Box::new(FileBackend::open(&dir.wal_path(id))?)),
            Self::Memory => Ok(Box::new(InMemoryBackend::new())),
        }
    }

    /// Log files left on disk, ascending. Always empty in memory.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be listed.
    pub fn wal_ids(&self) -> CoreResult<Vec<u64>> {
        match self {
            Self::Disk(dir) => dir.wal_ids(),
            Self::Memory => Ok(Vec::new()),
        }
    }

    /// Segment files present, ascending. Always empty in memory.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be listed.
    pub fn segment_ids(&self) -> CoreResult<Vec<u64>> {
        match self {
            Self::Disk(dir) => dir.segment_ids(),
            Self::Memory => Ok(Vec::new()),
        }
    }

    /// Deletes log file `id`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be removed.
    pub fn remove_wal(&self, id: u64) -> CoreResult<()> {
        match self {
            Self::Disk(dir) => dir.remove_wal(id),
            Self::Memory => Ok(()),
        }
    }

    /// Creates a new, empty segment file.
    ///
    /// # Errors
    ///
    /// Fails if the file already exists or cannot be created.
    pub fn create_segment(&self, id: u64) -> CoreResult<Box<dyn StorageBackend>> {
        match self {
            Self::Disk(dir) => Ok(Box::new(FileBackend::create_new(&dir.segment_path(id))?)),
            Self::Memory => Ok(Box::new(InMemoryBackend::new())),
        }
    }

    /// Opens an existing segment file.
    ///
    /// # Errors
    ///
    /// Fails if the file is missing. In-memory segments cannot be
    /// reopened.
    pub fn open_segment(&self, id: u64) -> CoreResult<Box<dyn StorageBackend>> {
        match self {
            Self::Disk(dir) => Ok(Box::new(FileBackend::open_existing(&dir.segment_path(id))?)),
            Self::Memory => Err(CoreError::invalid_format(format!(
                "in-memory segment {id} cannot be reopened"
            ))),
        }
    }

    /// Deletes segment file `id`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be removed.
    pub fn remove_segment(&self, id: u64) -> CoreResult<()> {
        match self {
            Self::Disk(dir) => dir.remove_segment(id),
            Self::Memory => Ok(()),
        }
    }

    /// Loads the manifest; in memory there never is one.
    ///
    /// # Errors
    ///
    /// See [`DatabaseDir::load_manifest`].
    pub fn load_manifest(&self) -> CoreResult<Option<Manifest>> {
        match self {
            Self::Disk(dir) => dir.load_manifest(),
            Self::Memory => Ok(None),
        }
    }

    /// Saves the manifest; a no-op in memory.
    ///
    /// # Errors
    ///
    /// See [`DatabaseDir::save_manifest`].
    pub fn save_manifest(&self, manifest: &Manifest) -> CoreResult<()> {
        match self {
            Self::Disk(dir) => dir.save_manifest(manifest),
            Self::Memory => Ok(()),
        }
    }

    /// Releases the directory lock, if any.
    pub fn release(&self) {
        if let Self::Disk(dir) = self {
            dir.release();
        }
    }
}
