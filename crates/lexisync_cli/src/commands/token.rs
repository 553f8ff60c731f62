//! Bearer token commands.

use lexisync_server::{AuthConfig, TokenAuthenticator, UserId};
use std::time::Duration;

/// Signs a token for `user`.
pub fn issue(user: &str, secret: &[u8]) -> Result<String, Box<dyn std::error::Error>> {
    let auth = TokenAuthenticator::new(AuthConfig::new(secret.to_vec()));
    Ok(auth.issue_token(&UserId::new(user))?)
}

/// Verifies a token and prints its claims.
pub fn verify(
    token: &str,
    secret: &[u8],
    expiry: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let auth = TokenAuthenticator::new(AuthConfig::new(secret.to_vec()).with_expiry(expiry));
    let verified = auth.verify(token)?;

    println!("Token valid");
    println!("  User:       {}", verified.user_id);
    println!("  Issued at:  {}", verified.issued_at);
    println!("  Expires at: {}", verified.expires_at);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies() {
        let token = issue("alice", b"cli-secret").unwrap();
        assert!(verify(&token, b"cli-secret", Duration::from_secs(3600)).is_ok());
        assert!(verify(&token, b"other", Duration::from_secs(3600)).is_err());
    }
}
