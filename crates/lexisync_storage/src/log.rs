//! Append-only framed record log.
//!
//! ## Frame Format
//!
//! ```text
//! +-----------+-----------+----------------+
//! | len: u32  | crc: u32  | body: len bytes|
//! +-----------+-----------+----------------+
//! ```
//!
//! Both integers are little-endian; `crc` is CRC-32 (IEEE) over `body`.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};

/// Size of the frame header (length + checksum).
pub const FRAME_HEADER_SIZE: usize = 8;

/// Largest record body accepted by the log.
pub const MAX_RECORD_SIZE: usize = 16 * 1024 * 1024;

/// Encodes one record body into a frame.
///
/// # Errors
///
/// Returns [`StorageError::RecordTooLarge`] if `body` exceeds
/// [`MAX_RECORD_SIZE`].
pub fn encode_frame(body: &[u8]) -> StorageResult<Vec<u8>> {
    if body.len() > MAX_RECORD_SIZE {
        return Err(StorageError::RecordTooLarge {
            size: body.len(),
            max: MAX_RECORD_SIZE,
        });
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(body).to_le_bytes());
    frame.extend_from_slice(body);
    Ok(frame)
}

/// Decodes consecutive frames from `bytes`.
///
/// Returns the record bodies and the length of the valid prefix. Decoding
/// stops at the first incomplete frame, oversized length or checksum
/// mismatch; everything from there on is considered garbage.
pub fn decode_frames(bytes: &[u8]) -> (Vec<Vec<u8>>, usize) {
    let mut records = Vec::new();
    let mut offset = 0usize;

    while bytes.len() - offset >= FRAME_HEADER_SIZE {
        let header = &bytes[offset..offset + FRAME_HEADER_SIZE];
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        if len > MAX_RECORD_SIZE {
            break;
        }

        let body_start = offset + FRAME_HEADER_SIZE;
        let Some(body_end) = body_start.checked_add(len) else {
            break;
        };
        if body_end > bytes.len() {
            break;
        }

        let body = &bytes[body_start..body_end];
        if crc32fast::hash(body) != crc {
            break;
        }

        records.push(body.to_vec());
        offset = body_end;
    }

    (records, offset)
}

/// Result of replaying a log on open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Replay {
    /// Record bodies in append order.
    pub records: Vec<Vec<u8>>,
    /// Bytes cut off the tail because they did not form a valid frame.
    pub discarded_bytes: u64,
}

/// An append-only log of checksummed records.
///
/// Every [`append`](Self::append) is synced before it returns.
pub struct RecordLog<B: StorageBackend> {
    backend: B,
}

impl<B: StorageBackend> RecordLog<B> {
    /// Opens a log on `backend`, replaying its records.
    ///
    /// A torn or corrupt tail is truncated away so later appends start on a
    /// frame boundary.
    pub fn open(mut backend: B) -> StorageResult<(Self, Replay)> {
        let bytes = backend.read_all()?;
        let (records, valid_len) = decode_frames(&bytes);

        let discarded_bytes = (bytes.len() - valid_len) as u64;
        if discarded_bytes > 0 {
            tracing::warn!(
                valid_len,
                discarded_bytes,
                "discarding torn tail of record log"
            );
            backend.truncate(valid_len as u64)?;
        }

        Ok((
            Self { backend },
            Replay {
                records,
                discarded_bytes,
            },
        ))
    }

    /// Appends one record and makes it durable.
    pub fn append(&mut self, body: &[u8]) -> StorageResult<()> {
        let frame = encode_frame(body)?;
        let start = self.backend.size()?;
        let offset = match self.backend.append(&frame) {
            Ok(offset) => offset,
            Err(e) => {
                // A short write may have left part of the frame behind.
                if let Err(cleanup) = self.backend.truncate(start) {
                    tracing::error!(error = %cleanup, start, "failed to drop partial frame");
                }
                return Err(e);
            }
        };
        if let Err(e) = self.backend.sync() {
            // Roll back so an unsynced frame is never replayed as committed.
            let _ = self.backend.truncate(offset);
            return Err(e);
        }
        Ok(())
    }

    /// Atomically replaces the log with `bodies`.
    pub fn rewrite<'a, I>(&mut self, bodies: I) -> StorageResult<()>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut contents = Vec::new();
        for body in bodies {
            contents.extend_from_slice(&encode_frame(body)?);
        }
        self.backend.replace(&contents)
    }

    /// Returns the size of the log in bytes.
    pub fn size(&self) -> StorageResult<u64> {
        self.backend.size()
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Consumes the log, returning the backend.
    pub fn into_backend(self) -> B {
        self.backend
    }
}
