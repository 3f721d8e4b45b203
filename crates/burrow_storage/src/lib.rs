//! # Burrow Storage
//!
//! Byte-store backends underneath the Burrow key-value engine.
//!
//! A backend is a flat, append-only run of bytes. It knows nothing about
//! log records, segments or keys: `burrow_core` owns every file format and
//! only asks backends to read, append, flush, sync and truncate.
//!
//! Two backends are provided:
//!
//! - [`FileBackend`] - one OS file per log or segment
//! - [`InMemoryBackend`] - a growable buffer, used by in-memory databases
//!   and by tests
//!
//! ## Example
//!
//! ```rust
//! use burrow_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"key=value").unwrap();
//! assert_eq!(backend.read_at(offset, 9).unwrap(), b"key=value");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
