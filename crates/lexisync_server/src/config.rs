//! Server configuration.

use std::time::Duration;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum number of changes accepted in one push request.
    pub max_push_batch: usize,
    /// Secret key for bearer token verification.
    pub auth_secret: Option<Vec<u8>>,
    /// Lifetime of issued bearer tokens.
    pub token_expiry: Duration,
}

impl ServerConfig {
    /// Creates a configuration with default limits and no auth secret.
    pub fn new() -> Self {
        Self {
            max_push_batch: 500,
            auth_secret: None,
            token_expiry: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }

    /// Sets the maximum push batch size. Values below 1 are raised to 1.
    pub fn with_max_push_batch(mut self, size: usize) -> Self {
        self.max_push_batch = size.max(1);
        self
    }

    /// Enables token authentication with the given secret.
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.auth_secret = Some(secret);
        self
    }

    /// Sets the token lifetime.
    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
