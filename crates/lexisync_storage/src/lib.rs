//! # LexiSync Storage
//!
//! Durable storage for the device-local change queue.
//!
//! Two layers live here:
//!
//! - [`StorageBackend`]: an opaque byte store (read, append, sync, replace).
//!   Backends never interpret what they hold.
//! - [`RecordLog`]: an append-only log of length-prefixed, CRC-checked
//!   frames on top of any backend. Replay stops at the first torn or corrupt
//!   frame and cuts the tail off, so a crash mid-append loses at most the
//!   record being written.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and ephemeral queues
//! - [`FileBackend`] - Persistent, guarded by an exclusive lock file
//!
//! ## Example
//!
//! ```rust
//! use lexisync_storage::{InMemoryBackend, RecordLog};
//!
//! let (mut log, replay) = RecordLog::open(InMemoryBackend::new()).unwrap();
//! assert!(replay.records.is_empty());
//!
//! log.append(b"first").unwrap();
//! log.append(b"second").unwrap();
//!
//! let (_, replay) = RecordLog::open(log.into_backend()).unwrap();
//! assert_eq!(replay.records, vec![b"first".to_vec(), b"second".to_vec()]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod log;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use log::{decode_frames, encode_frame, RecordLog, Replay, FRAME_HEADER_SIZE, MAX_RECORD_SIZE};
pub use memory::InMemoryBackend;
