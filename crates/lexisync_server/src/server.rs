//! Main sync server.

use crate::auth::{AuthConfig, Authenticator, TokenAuthenticator};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use crate::store::{MemoryServerStore, ServerStore};
use lexisync_protocol::{ErrorResponse, PullResponse, PushResponse};
use std::sync::Arc;

/// Route for pushing changes.
pub const PUSH_ROUTE: &str = "/api/sync/push";

/// Route for pulling a full snapshot.
pub const PULL_ROUTE: &str = "/api/sync/pull";

const FALLBACK_ERROR_BODY: &[u8] = br#"{"success":false,"error":"Internal server error"}"#;

/// An HTTP-shaped reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerReply {
    /// HTTP status code.
    pub status: u16,
    /// JSON body.
    pub body: Vec<u8>,
}

impl ServerReply {
    fn ok(body: serde_json::Result<Vec<u8>>) -> Self {
        match body {
            Ok(body) => Self { status: 200, body },
            Err(e) => Self::error(&ServerError::Internal(format!("encode failed: {e}"))),
        }
    }

    fn error(error: &ServerError) -> Self {
        if error.is_server_error() {
            tracing::error!(error = %error, "request failed");
        }
        let body = ErrorResponse::new(error.public_message())
            .encode()
            .unwrap_or_else(|_| FALLBACK_ERROR_BODY.to_vec());
        Self {
            status: error.status_code(),
            body,
        }
    }

    /// Returns true for a 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The sync server.
///
/// Transport-agnostic: an HTTP front end passes the method, path, bearer
/// token and body to [`handle_request`](Self::handle_request) and writes the
/// reply back.
///
/// # Example
///
/// ```
/// use lexisync_server::{ServerConfig, StaticAuthenticator, SyncServer};
/// use std::sync::Arc;
///
/// let auth = StaticAuthenticator::new().with_token("t0k3n", "alice");
/// let server = SyncServer::new(ServerConfig::default(), Arc::new(auth));
///
/// let reply = server.handle_request("GET", "/api/sync/pull", Some("t0k3n"), b"");
/// assert_eq!(reply.status, 200);
/// ```
pub struct SyncServer<S: ServerStore = MemoryServerStore> {
    handler: RequestHandler<S>,
}

impl SyncServer<MemoryServerStore> {
    /// Creates a server over a fresh in-memory store.
    pub fn new(config: ServerConfig, authenticator: Arc<dyn Authenticator>) -> Self {
        Self::with_store(config, Arc::new(MemoryServerStore::new()), authenticator)
    }

    /// Creates a server that verifies signed tokens with the configured
    /// secret.
    pub fn from_config(config: ServerConfig) -> ServerResult<Self> {
        let secret = config
            .auth_secret
            .clone()
            .ok_or_else(|| ServerError::Internal("no auth secret configured".into()))?;
        let auth = TokenAuthenticator::new(
            AuthConfig::new(secret).with_expiry(config.token_expiry),
        );
        Ok(Self::new(config, Arc::new(auth)))
    }
}

impl<S: ServerStore> SyncServer<S> {
    /// Creates a server over an existing store.
    pub fn with_store(
        config: ServerConfig,
        store: Arc<S>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        let context = Arc::new(HandlerContext::new(config, store, authenticator));
        Self {
            handler: RequestHandler::new(context),
        }
    }

    /// Returns the store.
    pub fn store(&self) -> &Arc<S> {
        &self.handler.context().store
    }

    /// Handles a push request body.
    pub fn handle_push(&self, bearer: Option<&str>, body: &[u8]) -> ServerResult<PushResponse> {
        self.handler.handle_push(bearer, body)
    }

    /// Handles a pull request.
    pub fn handle_pull(&self, bearer: Option<&str>) -> ServerResult<PullResponse> {
        self.handler.handle_pull(bearer)
    }

    /// Routes a request and encodes the reply.
    ///
    /// Errors are returned as `{"success": false, "error": ...}` with the
    /// matching status code.
    pub fn handle_request(
        &self,
        method: &str,
        path: &str,
        bearer: Option<&str>,
        body: &[u8],
    ) -> ServerReply {
        let route = path.split('?').next().unwrap_or(path);
        tracing::debug!(method, route, bytes = body.len(), "sync request");

        let reply = match (method.to_ascii_uppercase().as_str(), route) {
            ("POST", PUSH_ROUTE) => self
                .handle_push(bearer, body)
                .map(|response| ServerReply::ok(response.encode())),
            ("GET", PULL_ROUTE) => self
                .handle_pull(bearer)
                .map(|response| ServerReply::ok(response.encode())),
            _ => Err(ServerError::NotFound(format!("{method} {route}"))),
        };

        reply.unwrap_or_else(|e| ServerReply::error(&e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{StaticAuthenticator, UserId};
    use lexisync_protocol::{EntityTable, PullResponse, PushResponse};
    use serde_json::{json, Value};

    fn server() -> SyncServer {
        let auth = StaticAuthenticator::new().with_token("alice-token", "alice");
        SyncServer::new(ServerConfig::default(), Arc::new(auth))
    }

    fn body(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn push_and_pull_over_routes() {
        let server = server();
        let push = body(json!({"changes": [
            {"id": "1", "table": "books", "operation": "create", "localId": "b1",
             "data": {"name": "Deutsch", "language": "de"}, "timestamp": 1},
            {"id": "2", "table": "chapters", "operation": "create", "localId": "c1",
             "data": {"bookId": "b1", "name": "Kapitel 1", "order": 1}, "timestamp": 2},
            {"id": "3", "table": "chapters", "operation": "create", "localId": "c2",
             "data": {"bookId": "zzz", "name": "Kapitel 2", "order": 2}, "timestamp": 3}
        ]}));

        let reply = server.handle_request("POST", PUSH_ROUTE, Some("alice-token"), &push);
        assert_eq!(reply.status, 200);
        let response = PushResponse::decode(&reply.body).unwrap();
        assert_eq!(response.processed, 2);
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].change_id.as_str(), "3");

        let reply = server.handle_request("get", PULL_ROUTE, Some("alice-token"), b"");
        assert!(reply.is_success());
        let snapshot = PullResponse::decode(&reply.body).unwrap();
        assert_eq!(snapshot.books.len(), 1);
        assert_eq!(snapshot.chapters.len(), 1);
    }

    #[test]
    fn errors_map_to_status_codes() {
        let server = server();

        let reply = server.handle_request("POST", PUSH_ROUTE, None, b"[]");
        assert_eq!(reply.status, 401);
        let error = ErrorResponse::decode(&reply.body).unwrap();
        assert!(!error.success);
        assert_eq!(error.error, "Unauthorized");

        let reply = server.handle_request("POST", PUSH_ROUTE, Some("alice-token"), b"not json");
        assert_eq!(reply.status, 400);

        let reply = server.handle_request("DELETE", PUSH_ROUTE, Some("alice-token"), b"");
        assert_eq!(reply.status, 404);
        let reply = server.handle_request("GET", "/api/sync/other", Some("alice-token"), b"");
        assert_eq!(reply.status, 404);
    }

    #[test]
    fn auth_checked_before_body() {
        let server = server();
        let reply = server.handle_request("POST", PUSH_ROUTE, Some("bogus"), b"not json");
        assert_eq!(reply.status, 401);
    }

    #[test]
    fn signed_tokens_from_config() {
        let config = ServerConfig::new().with_auth(b"server-secret".to_vec());
        let server = SyncServer::from_config(config.clone()).unwrap();

        let issuer = TokenAuthenticator::new(AuthConfig::new(b"server-secret".to_vec()));
        let token = issuer.issue_token(&UserId::new("alice")).unwrap();

        let reply = server.handle_request("GET", PULL_ROUTE, Some(&token), b"");
        assert_eq!(reply.status, 200);

        assert!(SyncServer::from_config(ServerConfig::new()).is_err());
    }

    #[test]
    fn empty_push_updates_last_synced() {
        let server = server();
        let reply = server.handle_request("POST", PUSH_ROUTE, Some("alice-token"), b"[]");
        assert_eq!(reply.status, 200);

        let alice = UserId::new("alice");
        assert!(server.store().user_state(&alice).unwrap().last_synced_at.is_some());
        assert!(server
            .store()
            .live_rows(&alice, EntityTable::Books)
            .unwrap()
            .is_empty());
    }
}
