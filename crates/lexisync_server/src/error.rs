//! Error types for the sync server.

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that reject a whole request.
///
/// Failures of individual changes inside an accepted push are not
/// `ServerError`s; they are reported per change in the push response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// Invalid request format or content.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No resolvable identity for the request.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// No route for the method and path.
    #[error("not found: {0}")]
    NotFound(String),

    /// The authoritative store failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_) | ServerError::NotAuthorized(_) | ServerError::NotFound(_)
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Storage(_) | ServerError::Internal(_))
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) => 400,
            ServerError::NotAuthorized(_) => 401,
            ServerError::NotFound(_) => 404,
            ServerError::Storage(_) | ServerError::Internal(_) => 500,
        }
    }

    /// Returns the message sent to clients.
    ///
    /// Server-side failures are not described in detail.
    pub fn public_message(&self) -> String {
        match self {
            ServerError::NotAuthorized(_) => "Unauthorized".to_string(),
            ServerError::Storage(_) | ServerError::Internal(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}
