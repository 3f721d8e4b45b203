//! WAL writer and replay.

use crate::error::CoreResult;
use crate::types::{Entry, Timestamp};
use crate::wal::iterator::WalRecordIterator;
use crate::wal::record::{batch_payload, envelope, WalRecord, WalRecordType};
use burrow_storage::StorageBackend;
use tracing::{debug, warn};

/// Appends records to one log file.
///
/// A database writes to exactly one `WalWriter` at a time. When the
/// memtable it covers is frozen, the database opens a writer on a fresh
/// file and keeps the old file until the frozen memtable is flushed.
pub struct WalWriter {
    id: u64,
    backend: Box<dyn StorageBackend>,
    sync_writes: bool,
}

/// What a replay recovered from one log file.
#[derive(Debug, Default)]
pub struct WalReplay {
    /// Recovered entries in log order, each versioned with its commit
    /// timestamp.
    pub entries: Vec<Entry>,
    /// Highest commit timestamp seen, including skipped batches.
    pub max_ts: Timestamp,
    /// Number of batch records applied.
    pub batches: usize,
    /// Number of batch records skipped as already flushed.
    pub skipped: usize,
    /// Bytes cut off the end of the file.
    pub truncated_bytes: u64,
}

impl WalWriter {
    /// Creates a writer over `backend`, appending after any existing data.
    pub fn new(id: u64, backend: Box<dyn StorageBackend>, sync_writes: bool) -> Self {
        Self {
            id,
            backend,
            sync_writes,
        }
    }

    /// The file id (`wal-<id>.log`).
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Appends one committed transaction.
    ///
    /// # Errors
    ///
    /// Fails if encoding or the backend write fails. On failure the log
    /// is cut back to its size before the call, so a batch is either
    /// fully in the log or not at all.
    pub fn append_batch(&mut self, commit_ts: Timestamp, entries: &[Entry]) -> CoreResult<u64> {
        let payload = batch_payload(commit_ts, entries)?;
        self.append_bytes(&envelope(WalRecordType::Batch, &payload)?)
    }

    /// Appends any record.
    ///
    /// # Errors
    ///
    /// Same as [`WalWriter::append_batch`].
    pub fn append(&mut self, record: &WalRecord) -> CoreResult<u64> {
        self.append_bytes(&record.encode()?)
    }

    fn append_bytes(&mut self, data: &[u8]) -> CoreResult<u64> {
        let before = self.backend.size()?;
        let result = self.backend.append(data).and_then(|offset| {
            if self.sync_writes {
                self.backend.flush()?;
                self.backend.sync()?;
            }
            Ok(offset)
        });

        match result {
            Ok(offset) => Ok(offset),
            Err(err) => {
                if let Err(rollback) = self.backend.truncate(before) {
                    warn!(wal = self.id, error = %rollback, "failed to roll back partial WAL append");
                }
                Err(err.into())
            }
        }
    }

    /// Flushes and fsyncs the log.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot sync.
    pub fn sync(&mut self) -> CoreResult<()> {
        self.backend.flush()?;
        self.backend.sync()?;
        Ok(())
    }

    /// Returns the current log size in bytes.
    ///
    /// # Errors
    ///
    /// Fails if the backend size cannot be read.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Returns a streaming iterator over the records in this log.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot be accessed.
    pub fn iter(&self) -> CoreResult<WalRecordIterator<'_>> {
        WalRecordIterator::new(self.backend.as_ref(), 0)
    }

    /// Replays the log, skipping batches at or below `flushed`.
    ///
    /// A torn record at the end of the file is cut off so later appends
    /// start on a record boundary. Checkpoint records raise the skip
    /// threshold for the records after them.
    ///
    /// # Errors
    ///
    /// Any corruption other than a torn tail is fatal.
    pub fn replay(&mut self, flushed: Timestamp) -> CoreResult<WalReplay> {
        let mut replay = WalReplay::default();
        let mut skip_through = flushed;

        let (valid_end, torn) = {
            let mut iter = self.iter()?;
            for item in iter.by_ref() {
                let (_, record) = item?;
                match record {
                    WalRecord::Batch { commit_ts, entries } => {
                        replay.max_ts = replay.max_ts.max(commit_ts);
                        if commit_ts <= skip_through {
                            replay.skipped += 1;
                            continue;
                        }
                        replay.batches += 1;
                        replay.entries.extend(entries);
                    }
                    WalRecord::Checkpoint { ts } => {
                        replay.max_ts = replay.max_ts.max(ts);
                        skip_through = skip_through.max(ts);
                    }
                }
            }
            (iter.valid_end(), iter.is_torn())
        };

        if torn {
            let size = self.backend.size()?;
            replay.truncated_bytes = size - valid_end;
            warn!(
                wal = self.id,
                offset = valid_end,
                bytes = replay.truncated_bytes,
                "truncating torn record at end of WAL"
            );
            self.backend.truncate(valid_end)?;
        }

        debug!(
            wal = self.id,
            batches = replay.batches,
            skipped = replay.skipped,
            "replayed WAL"
        );
        Ok(replay)
    }
}

impl std::fmt::Debug for WalWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalWriter")
            .field("id", &self.id)
            .field("sync_writes", &self.sync_writes)
            .finish_non_exhaustive()
    }
}
