//! The storage core: memtables plus immutable segments.

use crate::dir::StorageLayout;
use crate::error::CoreResult;
use crate::manifest::Manifest;
use crate::segment::compaction::{CompactionResult, Compactor};
use crate::segment::memtable::MemTable;
use crate::segment::table::Segment;
use crate::types::{Entry, Timestamp};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A memtable that no longer takes writes, waiting to become a segment.
#[derive(Debug)]
pub struct FrozenTable {
    /// The versions.
    pub table: Arc<MemTable>,
    /// Log files that hold exactly these versions; deleted after flush.
    pub wal_ids: Vec<u64>,
}

/// One consistent view of every table, newest data in `active`.
///
/// Swapped whole on freeze, flush and merge, so a reader holding an
/// `Arc<Levels>` never sees a table twice or misses one.
#[derive(Debug, Clone, Default)]
pub struct Levels {
    /// The memtable taking writes.
    pub active: Arc<MemTable>,
    /// Frozen memtables, oldest first.
    pub frozen: Vec<Arc<FrozenTable>>,
    /// Segments, oldest first.
    pub segments: Vec<Arc<Segment>>,
}

/// Versioned key storage shared by every transaction.
///
/// Writers are serialized by the caller; flushes and merges serialize on
/// an internal maintenance lock. Readers only clone an `Arc`.
pub struct StorageCore {
    layout: StorageLayout,
    manifest: Mutex<Manifest>,
    next_wal_id: AtomicU64,
    levels: RwLock<Arc<Levels>>,
    maintenance: Mutex<()>,
}

impl StorageCore {
    /// Loads the manifest and every segment it lists.
    ///
    /// Segment files the manifest does not list are leftovers of an
    /// interrupted flush or merge and are deleted.
    ///
    /// # Errors
    ///
    /// Fails if the manifest or a listed segment is missing or corrupted.
    pub fn open(layout: StorageLayout) -> CoreResult<Self> {
        let manifest = layout.load_manifest()?.unwrap_or_default();

        for orphan in layout
            .segment_ids()?
            .into_iter()
            .filter(|id| !manifest.segments.contains(id))
        {
            warn!(segment = orphan, "removing segment not listed in manifest");
            layout.remove_segment(orphan)?;
        }

        let segments = manifest
            .segments
            .iter()
            .map(|&id| Segment::open(id, layout.open_segment(id)?).map(Arc::new))
            .collect::<CoreResult<Vec<_>>>()?;

        let next_wal_id = layout
            .wal_ids()?
            .last()
            .map_or(manifest.next_wal_id, |&id| manifest.next_wal_id.max(id + 1));

        Ok(Self {
            layout,
            next_wal_id: AtomicU64::new(next_wal_id),
            manifest: Mutex::new(manifest),
            levels: RwLock::new(Arc::new(Levels {
                segments,
                ..Levels::default()
            })),
            maintenance: Mutex::new(()),
        })
    }

    /// Where files live.
    #[must_use]
    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// A copy of the current manifest.
    #[must_use]
    pub fn manifest(&self) -> Manifest {
        let mut manifest = self.manifest.lock().clone();
        manifest.next_wal_id = self.next_wal_id.load(Ordering::SeqCst);
        manifest
    }

    /// Every commit at or below this is in a segment.
    #[must_use]
    pub fn flushed_ts(&self) -> Timestamp {
        self.manifest.lock().flushed_ts
    }

    /// Reserves a fresh log file id.
    pub fn allocate_wal_id(&self) -> u64 {
        self.next_wal_id.fetch_add(1, Ordering::SeqCst)
    }

    /// The current table set.
    #[must_use]
    pub fn levels(&self) -> Arc<Levels> {
        Arc::clone(&self.levels.read())
    }

    /// Inserts committed versions into the active memtable.
    pub fn apply(&self, entries: impl IntoIterator<Item = Entry>) {
        let levels = self.levels.read();
        for entry in entries {
            levels.active.put(entry);
        }
    }

    /// Bytes held by the active memtable.
    #[must_use]
    pub fn active_size(&self) -> usize {
        self.levels.read().active.approximate_size()
    }

    /// Returns the newest version of `key` at or below `as_of`, searching
    /// newest tables first. Tombstones and expired versions are returned.
    ///
    /// # Errors
    ///
    /// Fails if a segment read fails.
    pub fn get(&self, key: &[u8], as_of: Timestamp) -> CoreResult<Option<Entry>> {
        let as_of = as_of.as_u64();
        let levels = self.levels();

        if let Some(entry) = levels.active.get(key, as_of) {
            return Ok(Some(entry));
        }
        for frozen in levels.frozen.iter().rev() {
            if let Some(entry) = frozen.table.get(key, as_of) {
                return Ok(Some(entry));
            }
        }
        for segment in levels.segments.iter().rev() {
            if let Some(entry) = segment.get(key, as_of)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Moves the active memtable to the frozen list and installs an empty
    /// one. `wal_ids` are the log files covering the frozen table.
    ///
    /// Returns false, changing nothing, when the active table is empty.
    pub fn freeze(&self, wal_ids: Vec<u64>) -> bool {
        let mut levels = self.levels.write();
        if levels.active.is_empty() {
            return false;
        }

        let mut next = Levels::clone(&levels);
        let table = std::mem::take(&mut next.active);
        debug!(
            versions = table.len(),
            bytes = table.approximate_size(),
            ?wal_ids,
            "froze memtable"
        );
        next.frozen.push(Arc::new(FrozenTable { table, wal_ids }));
        *levels = Arc::new(next);
        true
    }

    /// Writes every frozen memtable to a segment, oldest first.
    ///
    /// For each table: the segment is written and synced, the manifest is
    /// saved, the table set is swapped, then the covering log files are
    /// deleted. A crash at any point leaves either the log or the segment
    /// to recover from.
    ///
    /// # Errors
    ///
    /// Fails if a segment or the manifest cannot be written; tables not
    /// yet flushed stay frozen.
    pub fn flush_frozen(&self) -> CoreResult<usize> {
        let _maintenance = self.maintenance.lock();
        let mut flushed = 0;

        while let Some(frozen) = self.levels().frozen.first().cloned() {
            let entries = frozen.table.entries();
            let id = self.manifest.lock().allocate_segment_id();
            let segment = self.write_segment(id, &entries)?;

            let mut manifest = self.manifest();
            manifest.segments.push(id);
            manifest.flushed_ts = manifest
                .flushed_ts
                .max(Timestamp::new(frozen.table.max_version()));
            self.save_manifest(manifest)?;

            {
                let mut levels = self.levels.write();
                let mut next = Levels::clone(&levels);
                next.frozen.retain(|f| !Arc::ptr_eq(f, &frozen));
                next.segments.push(Arc::new(segment));
                *levels = Arc::new(next);
            }

            for &wal_id in &frozen.wal_ids {
                if let Err(err) = self.layout.remove_wal(wal_id) {
                    warn!(wal = wal_id, error = %err, "failed to delete flushed WAL");
                }
            }

            debug!(segment = id, versions = entries.len(), "flushed memtable");
            flushed += 1;
        }

        Ok(flushed)
    }

    /// Merges every segment into one.
    ///
    /// Returns `None` when there are no segments.
    ///
    /// # Errors
    ///
    /// Fails if segments cannot be read or the result cannot be written.
    pub fn merge(&self, low_watermark: Timestamp, now_ms: u64) -> CoreResult<Option<CompactionResult>> {
        let _maintenance = self.maintenance.lock();
        let inputs = self.levels().segments.clone();
        if inputs.is_empty() {
            return Ok(None);
        }

        let mut records = Vec::new();
        for segment in &inputs {
            records.extend(segment.entries()?);
        }
        let (output, result) = Compactor::new(low_watermark.as_u64(), now_ms).compact(records);

        let merged = if output.is_empty() {
            None
        } else {
            let id = self.manifest.lock().allocate_segment_id();
            Some(self.write_segment(id, &output)?)
        };

        let input_ids: Vec<u64> = inputs.iter().map(|s| s.id()).collect();
        let mut manifest = self.manifest();
        manifest.segments.retain(|id| !input_ids.contains(id));
        if let Some(segment) = &merged {
            manifest.segments.insert(0, segment.id());
        }
        self.save_manifest(manifest)?;

        {
            let mut levels = self.levels.write();
            let mut next = Levels::clone(&levels);
            next.segments.retain(|s| !input_ids.contains(&s.id()));
            if let Some(segment) = merged {
                next.segments.insert(0, Arc::new(segment));
            }
            *levels = Arc::new(next);
        }

        for &id in &input_ids {
            if let Err(err) = self.layout.remove_segment(id) {
                warn!(segment = id, error = %err, "failed to delete merged segment");
            }
        }

        info!(
            inputs = input_ids.len(),
            input_records = result.input_records,
            output_records = result.output_records,
            watermark = low_watermark.as_u64(),
            "merged segments"
        );
        Ok(Some(result))
    }

    /// Persists the manifest with the current next-id counters.
    ///
    /// # Errors
    ///
    /// Fails if the manifest cannot be written.
    pub fn persist_manifest(&self) -> CoreResult<()> {
        let _maintenance = self.maintenance.lock();
        self.save_manifest(self.manifest())
    }

    fn save_manifest(&self, mut manifest: Manifest) -> CoreResult<()> {
        manifest.next_wal_id = self.next_wal_id.load(Ordering::SeqCst);
        self.layout.save_manifest(&manifest)?;
        let mut current = self.manifest.lock();
        // Keep ids allocated while the file was being written.
        manifest.next_segment_id = manifest.next_segment_id.max(current.next_segment_id);
        *current = manifest;
        Ok(())
    }

    fn write_segment(&self, id: u64, entries: &[Entry]) -> CoreResult<Segment> {
        let backend = self.layout.create_segment(id)?;
        Segment::write(id, backend, entries).inspect_err(|_| {
            if let Err(err) = self.layout.remove_segment(id) {
                warn!(segment = id, error = %err, "failed to remove partial segment");
            }
        })
    }
}

impl std::fmt::Debug for StorageCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let levels = self.levels();
        f.debug_struct("StorageCore")
            .field("memory", &self.layout.is_memory())
            .field("frozen", &levels.frozen.len())
            .field("segments", &levels.segments.len())
            .finish_non_exhaustive()
    }
}
