//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level byte store.
///
/// Backends are **opaque**: they hold bytes for the record log and know
/// nothing about frames or queue records.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_all` returns every byte appended since the last `replace`,
///   minus anything removed by `truncate`
/// - after `sync` returns, appended data survives process termination
/// - `replace` is all-or-nothing: readers see either the old or the new
///   contents, never a mix
pub trait StorageBackend: Send + Sync {
    /// Reads the full contents of the store.
    fn read_all(&self) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the store, returning its offset.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Makes all appended data durable.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes.
    fn size(&self) -> StorageResult<u64>;

    /// Cuts the store down to `new_size` bytes.
    ///
    /// # Errors
    ///
    /// Fails if `new_size` is greater than the current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Atomically replaces the whole contents of the store.
    fn replace(&mut self, contents: &[u8]) -> StorageResult<()>;
}
