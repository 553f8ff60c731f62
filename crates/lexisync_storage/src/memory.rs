//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// An in-memory storage backend.
///
/// Clones share the same buffer, which lets tests "reopen" a queue on the
/// bytes a previous instance left behind.
///
/// # Example
///
/// ```rust
/// use lexisync_storage::{InMemoryBackend, StorageBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let offset = backend.append(b"change").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(backend.size().unwrap(), 6);
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
    fail_writes: Arc<RwLock<bool>>,
    torn_write: Arc<RwLock<Option<usize>>>,
}

impl InMemoryBackend {
    /// Creates a new empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend with pre-existing bytes.
    ///
    /// Useful for recovery tests (torn tails, corrupt frames).
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
            fail_writes: Arc::new(RwLock::new(false)),
            torn_write: Arc::new(RwLock::new(None)),
        }
    }

    /// Returns a copy of the stored bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Makes every subsequent write fail as if the device were full.
    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.write() = fail;
    }

    /// Makes the next append write only its first `len` bytes and then fail,
    /// like a process losing the disk halfway through a write.
    pub fn tear_next_append(&self, len: usize) {
        *self.torn_write.write() = Some(len);
    }

    fn check_writable(&self) -> StorageResult<()> {
        if *self.fail_writes.read() {
            return Err(StorageError::Io(std::io::Error::other(
                "no space left on device",
            )));
        }
        Ok(())
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        Ok(self.data.read().clone())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        self.check_writable()?;
        let mut data = self.data.write();
        let offset = data.len() as u64;
        if let Some(len) = self.torn_write.write().take() {
            data.extend_from_slice(&new_data[..len.min(new_data.len())]);
            return Err(StorageError::Io(std::io::Error::other("short write")));
        }
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncatePastEnd {
                requested: new_size,
                size,
            });
        }
        data.truncate(new_size as usize);
        Ok(())
    }

    fn replace(&mut self, contents: &[u8]) -> StorageResult<()> {
        self.check_writable()?;
        *self.data.write() = contents.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_returns_offsets() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.read_all().unwrap(), b"hello world");
    }

    #[test]
    fn clones_share_contents() {
        let mut backend = InMemoryBackend::new();
        let other = backend.clone();
        backend.append(b"shared").unwrap();
        assert_eq!(other.data(), b"shared");
    }

    #[test]
    fn truncate_past_end_fails() {
        let mut backend = InMemoryBackend::with_data(b"abc".to_vec());
        assert!(matches!(
            backend.truncate(10),
            Err(StorageError::TruncatePastEnd { .. })
        ));
        backend.truncate(1).unwrap();
        assert_eq!(backend.data(), b"a");
    }

    #[test]
    fn failing_writes_surface_io_errors() {
        let mut backend = InMemoryBackend::new();
        backend.set_fail_writes(true);
        assert!(matches!(backend.append(b"x"), Err(StorageError::Io(_))));
        assert!(backend.data().is_empty());
    }

    #[test]
    fn torn_append_leaves_partial_bytes() {
        let mut backend = InMemoryBackend::new();
        backend.tear_next_append(2);
        assert!(backend.append(b"abcdef").is_err());
        assert_eq!(backend.data(), b"ab");

        assert_eq!(backend.append(b"gh").unwrap(), 2);
        assert_eq!(backend.data(), b"abgh");
    }
}
