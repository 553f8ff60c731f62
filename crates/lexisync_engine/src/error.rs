//! Error types for the sync engine.

use lexisync_protocol::ProtocolError;
use lexisync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server did not accept the bearer credential.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The server rejected the whole request as invalid.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The server failed while processing the request.
    #[error("server error: {0}")]
    ServerError(String),

    /// A response could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A change failed validation before it was queued.
    #[error("invalid change: {0}")]
    InvalidChange(#[from] ProtocolError),

    /// The change queue could not be read or written.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A queue record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The local entity store failed.
    #[error("local store error: {0}")]
    LocalStore(String),

    /// Another flush or full sync is running.
    #[error("a sync cycle is already in flight")]
    AlreadyInFlight,

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::ServerError(_) => true,
            SyncError::NotConnected => true,
            SyncError::AlreadyInFlight => true,
            _ => false,
        }
    }

    /// Returns true if the error came from reaching the server at all.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SyncError::Transport { .. } | SyncError::NotConnected | SyncError::ServerError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::ServerError("internal error".into()).is_retryable());
        assert!(SyncError::NotConnected.is_retryable());
        assert!(!SyncError::AuthenticationFailed("expired".into()).is_retryable());
        assert!(!SyncError::Rejected("bad payload".into()).is_retryable());
    }

    #[test]
    fn storage_errors_convert() {
        let io = std::io::Error::other("disk full");
        let err: SyncError = StorageError::from(io).into();
        assert!(matches!(err, SyncError::Storage(_)));
        assert!(!err.is_retryable());
        assert!(!err.is_transport());
    }

    #[test]
    fn error_display() {
        assert_eq!(SyncError::NotConnected.to_string(), "not connected to server");
        assert_eq!(
            SyncError::AlreadyInFlight.to_string(),
            "a sync cycle is already in flight"
        );
    }
}
