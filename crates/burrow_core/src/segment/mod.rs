//! Versioned storage: memtables and immutable segments.
//!
//! Commits land in the active [`MemTable`]. A full memtable is frozen and
//! later written out as a sorted, write-once [`Segment`]. Merging folds all
//! segments into one and drops versions no reader can see.
//!
//! ## Segment Record Format
//!
//! ```text
//! | record_len (4) | flags (1) | version (8) | expires_at (8) | key_len (4) | key | value | crc32 (4) |
//! ```
//!
//! Flags:
//! - `0x01` = tombstone

mod compaction;
mod memtable;
mod record;
mod store;
mod table;

pub use compaction::{CompactionResult, Compactor};
pub use memtable::MemTable;
pub use record::{SegmentRecord, SegmentRecordFlags, SEGMENT_MAGIC, SEGMENT_VERSION};
pub use store::{FrozenTable, Levels, StorageCore};
pub use table::Segment;
