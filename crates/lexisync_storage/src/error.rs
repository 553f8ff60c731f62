//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred (disk full, permission denied, ...).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Another process already holds the store.
    #[error("storage locked: {} is in use by another process", path.display())]
    Locked {
        /// Path of the lock file that could not be acquired.
        path: PathBuf,
    },

    /// A record is too large to be framed.
    #[error("record too large: {size} bytes exceeds maximum of {max} bytes")]
    RecordTooLarge {
        /// Size of the rejected record.
        size: usize,
        /// Maximum accepted size.
        max: usize,
    },

    /// Truncation past the end of the store was requested.
    #[error("cannot truncate to {requested} bytes, store holds {size} bytes")]
    TruncatePastEnd {
        /// Requested new size.
        requested: u64,
        /// Current size.
        size: u64,
    },
}
