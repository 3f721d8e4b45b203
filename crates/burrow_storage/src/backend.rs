//! The backend trait.

use crate::error::StorageResult;

/// An append-only byte store.
///
/// Durability logs and immutable segments each sit on one backend. The
/// engine interprets the bytes; the backend only moves them.
///
/// # Invariants
///
/// - `append` returns the offset the bytes were written at, which equals
///   `size()` before the call
/// - `read_at` returns exactly the bytes previously appended there
/// - after `sync` returns, everything appended so far survives a crash
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Fails with `ReadPastEnd` when the range is not fully inside the
    /// backend, or with `Io` on an operating system error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data` and returns the offset it was written at.
    ///
    /// # Errors
    ///
    /// Fails with `Io` if the write fails. A failed append may leave a
    /// partial tail behind; callers that need all-or-nothing semantics
    /// truncate back to the previous size.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Fails with `Io` if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes.
    ///
    /// # Errors
    ///
    /// Fails if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Forces data and metadata to stable storage.
    ///
    /// # Errors
    ///
    /// Fails with `Io` if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Drops every byte at or after `new_size`.
    ///
    /// Used to cut a torn record off the end of a durability log and to
    /// roll back a failed append.
    ///
    /// # Errors
    ///
    /// Fails with `TruncateBeyondEnd` if `new_size` exceeds the current
    /// size, or with `Io` on an operating system error.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Reads the whole backend.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`StorageBackend::size`] and
    /// [`StorageBackend::read_at`].
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        self.read_at(0, size as usize)
    }
}
