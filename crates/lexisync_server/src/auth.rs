//! Authentication support for the sync server.
//!
//! Every request is resolved to a [`UserId`] before any sync logic runs.
//! The [`Authenticator`] trait is the seam; [`TokenAuthenticator`] verifies
//! HMAC-SHA256 signed bearer tokens and [`StaticAuthenticator`] maps fixed
//! tokens to users for tests and local tooling.
//!
//! ## Token Format
//!
//! ```text
//! <userId>.<issuedAtMs>.<hexSignature>
//! ```
//!
//! The signature is HMAC-SHA256 over `<userId>.<issuedAtMs>`. The user id may
//! itself contain dots; the last two segments are always the timestamp and
//! the signature.

use crate::error::{ServerError, ServerResult};
use hmac::{Hmac, Mac};
use lexisync_protocol::now_millis;
use sha2::Sha256;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Tokens issued this far in the future are rejected.
const MAX_CLOCK_SKEW_MS: i64 = 5 * 60 * 1000;

/// Identity of an authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(String);

impl UserId {
    /// Creates a user id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Resolves a bearer credential to a user.
pub trait Authenticator: Send + Sync {
    /// Authenticates a request.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotAuthorized`] if the credential is missing or
    /// does not resolve to a user.
    fn authenticate(&self, bearer: Option<&str>) -> ServerResult<UserId>;
}

/// Authentication configuration.
#[derive(Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token lifetime.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }

    /// Sets the token lifetime.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &"<redacted>")
            .field("token_expiry", &self.token_expiry)
            .finish()
    }
}

/// A verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    /// Token subject.
    pub user_id: UserId,
    /// When the token was issued (epoch millis).
    pub issued_at: i64,
    /// When the token stops being accepted (epoch millis).
    pub expires_at: i64,
}

/// Issues and verifies HMAC-signed bearer tokens.
#[derive(Debug, Clone)]
pub struct TokenAuthenticator {
    config: AuthConfig,
}

impl TokenAuthenticator {
    /// Creates a new token authenticator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Issues a token for `user_id`, valid from now.
    pub fn issue_token(&self, user_id: &UserId) -> ServerResult<String> {
        self.issue_token_at(user_id, now_millis())
    }

    /// Issues a token with an explicit issue time.
    pub fn issue_token_at(&self, user_id: &UserId, issued_at: i64) -> ServerResult<String> {
        if user_id.as_str().is_empty() {
            return Err(ServerError::InvalidRequest("empty user id".into()));
        }
        let claims = format!("{}.{}", user_id, issued_at);
        let signature = self.mac(claims.as_bytes())?.finalize().into_bytes();
        Ok(format!("{}.{}", claims, hex::encode(signature)))
    }

    /// Verifies a token and returns its claims.
    pub fn verify(&self, token: &str) -> ServerResult<VerifiedToken> {
        self.verify_at(token, now_millis())
    }

    /// Verifies a token against an explicit clock.
    pub fn verify_at(&self, token: &str, now: i64) -> ServerResult<VerifiedToken> {
        let mut parts = token.rsplitn(3, '.');
        let (Some(signature_hex), Some(issued_at), Some(user_id)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(ServerError::NotAuthorized("malformed token".into()));
        };
        if user_id.is_empty() {
            return Err(ServerError::NotAuthorized("malformed token".into()));
        }

        let signature = hex::decode(signature_hex)
            .map_err(|_| ServerError::NotAuthorized("malformed signature".into()))?;
        let mac = self.mac(format!("{user_id}.{issued_at}").as_bytes())?;
        mac.verify_slice(&signature)
            .map_err(|_| ServerError::NotAuthorized("invalid signature".into()))?;

        let issued_at: i64 = issued_at
            .parse()
            .map_err(|_| ServerError::NotAuthorized("malformed issue time".into()))?;
        let expiry_ms = i64::try_from(self.config.token_expiry.as_millis()).unwrap_or(i64::MAX);
        let expires_at = issued_at.saturating_add(expiry_ms);

        if issued_at > now.saturating_add(MAX_CLOCK_SKEW_MS) {
            return Err(ServerError::NotAuthorized("token issued in the future".into()));
        }
        if now >= expires_at {
            return Err(ServerError::NotAuthorized("token expired".into()));
        }

        Ok(VerifiedToken {
            user_id: UserId::new(user_id),
            issued_at,
            expires_at,
        })
    }

    fn mac(&self, data: &[u8]) -> ServerResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("invalid HMAC key: {e}")))?;
        mac.update(data);
        Ok(mac)
    }
}

impl Authenticator for TokenAuthenticator {
    fn authenticate(&self, bearer: Option<&str>) -> ServerResult<UserId> {
        let token = bearer.ok_or_else(|| ServerError::NotAuthorized("missing token".into()))?;
        self.verify(token).map(|t| t.user_id)
    }
}

/// Maps fixed tokens to users.
///
/// Useful for testing and local tooling.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthenticator {
    tokens: HashMap<String, UserId>,
}

impl StaticAuthenticator {
    /// Creates an authenticator that accepts no tokens.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts `token` as `user_id`.
    pub fn with_token(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), UserId::new(user_id));
        self
    }
}

impl Authenticator for StaticAuthenticator {
    fn authenticate(&self, bearer: Option<&str>) -> ServerResult<UserId> {
        bearer
            .and_then(|token| self.tokens.get(token))
            .cloned()
            .ok_or_else(|| ServerError::NotAuthorized("unknown token".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator() -> TokenAuthenticator {
        TokenAuthenticator::new(AuthConfig::new(b"test-secret-key-32-bytes-long!!".to_vec()))
    }

    #[test]
    fn issue_and_verify() {
        let auth = authenticator();
        let user = UserId::new("user-42");

        let token = auth.issue_token(&user).unwrap();
        assert!(token.starts_with("user-42."));

        let verified = auth.verify(&token).unwrap();
        assert_eq!(verified.user_id, user);
        assert_eq!(auth.authenticate(Some(&token)).unwrap(), user);
    }

    #[test]
    fn user_id_may_contain_dots() {
        let auth = authenticator();
        let user = UserId::new("ada.lovelace@example.com");
        let token = auth.issue_token(&user).unwrap();
        assert_eq!(auth.verify(&token).unwrap().user_id, user);
    }

    #[test]
    fn reject_tampered_token() {
        let auth = authenticator();
        let token = auth.issue_token(&UserId::new("alice")).unwrap();

        let forged = token.replacen("alice", "mallory", 1);
        assert!(matches!(
            auth.verify(&forged),
            Err(ServerError::NotAuthorized(_))
        ));

        let mut bad_sig = token.clone();
        let last = bad_sig.pop().unwrap();
        bad_sig.push(if last == '0' { '1' } else { '0' });
        assert!(auth.verify(&bad_sig).is_err());
    }

    #[test]
    fn reject_other_secret() {
        let token = authenticator().issue_token(&UserId::new("alice")).unwrap();
        let other = TokenAuthenticator::new(AuthConfig::new(b"another-secret".to_vec()));
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn reject_expired_token() {
        let auth = TokenAuthenticator::new(
            AuthConfig::new(b"secret".to_vec()).with_expiry(Duration::from_secs(60)),
        );
        let token = auth.issue_token_at(&UserId::new("alice"), 1_000).unwrap();

        assert!(auth.verify_at(&token, 1_000 + 59_999).is_ok());
        assert!(auth.verify_at(&token, 1_000 + 60_000).is_err());
    }

    #[test]
    fn reject_future_token() {
        let auth = authenticator();
        let token = auth
            .issue_token_at(&UserId::new("alice"), 10 * MAX_CLOCK_SKEW_MS)
            .unwrap();
        assert!(auth.verify_at(&token, 0).is_err());
    }

    #[test]
    fn reject_malformed_tokens() {
        let auth = authenticator();
        for token in ["", "alice", "alice.123", ".123.abcd", "alice.123.zz"] {
            assert!(auth.verify(token).is_err(), "accepted {token:?}");
        }
        assert!(auth.authenticate(None).is_err());
    }

    #[test]
    fn static_authenticator() {
        let auth = StaticAuthenticator::new().with_token("device-token", "alice");

        assert_eq!(
            auth.authenticate(Some("device-token")).unwrap(),
            UserId::new("alice")
        );
        assert!(auth.authenticate(Some("wrong")).is_err());
        assert!(auth.authenticate(None).is_err());
    }
}
