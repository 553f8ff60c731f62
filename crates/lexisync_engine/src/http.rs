//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted via [`HttpClient`] so the engine can
//! run on whatever networking stack the host application already has.
//! Bodies are JSON; the bearer credential travels in the `Authorization`
//! header.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::{SyncSession, SyncTransport};
use lexisync_protocol::{ErrorResponse, PullResponse, PushRequest, PushResponse};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Path of the push endpoint.
pub const PUSH_PATH: &str = "/api/sync/push";

/// Path of the pull endpoint.
pub const PULL_PATH: &str = "/api/sync/pull";

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET.
    Get,
    /// POST.
    Post,
}

impl HttpMethod {
    /// Returns the method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// An outgoing request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Method.
    pub method: HttpMethod,
    /// Absolute URL.
    pub url: String,
    /// Bearer credential for the `Authorization` header.
    pub bearer: String,
    /// JSON body (empty for GET).
    pub body: Vec<u8>,
    /// Request timeout.
    pub timeout: Duration,
}

/// A received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport (reqwest,
/// hyper, ureq, a platform networking API, ...). An `Err` means the request
/// never produced a response.
pub trait HttpClient: Send + Sync {
    /// Sends a request.
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// HTTP-based sync transport.
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    timeout: Duration,
    client: C,
    connected: AtomicBool,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
            client,
            connected: AtomicBool::new(true),
        }
    }

    /// Creates a transport for the configured server URL and timeout.
    pub fn from_config(config: &SyncConfig, client: C) -> Self {
        Self::new(config.server_url.as_str(), client).with_timeout(config.timeout)
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    fn send(
        &self,
        method: HttpMethod,
        path: &str,
        session: &SyncSession,
        body: Vec<u8>,
    ) -> SyncResult<Vec<u8>> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let request = HttpRequest {
            method,
            url: format!("{}{}", self.base_url, path),
            bearer: session.bearer.clone(),
            body,
            timeout: self.timeout,
        };
        tracing::debug!(method = method.as_str(), url = %request.url, "sending sync request");

        let response = self
            .client
            .send(request)
            .map_err(SyncError::transport_retryable)?;

        classify(response)
    }
}

fn classify(response: HttpResponse) -> SyncResult<Vec<u8>> {
    let status = response.status;
    if (200..300).contains(&status) {
        return Ok(response.body);
    }

    let message = ErrorResponse::decode(&response.body)
        .map(|e| e.error)
        .unwrap_or_else(|_| format!("HTTP {status}"));
    Err(match status {
        401 | 403 => SyncError::AuthenticationFailed(message),
        400 | 404 | 413 | 422 => SyncError::Rejected(message),
        408 | 429 => SyncError::transport_retryable(message),
        500..=599 => SyncError::ServerError(message),
        _ => SyncError::transport_fatal(message),
    })
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn push(&self, session: &SyncSession, request: &PushRequest) -> SyncResult<PushResponse> {
        let body = request
            .encode()
            .map_err(|e| SyncError::Protocol(format!("failed to encode push: {e}")))?;
        let bytes = self.send(HttpMethod::Post, PUSH_PATH, session, body)?;
        PushResponse::decode(&bytes)
            .map_err(|e| SyncError::Protocol(format!("failed to decode push response: {e}")))
    }

    fn pull(&self, session: &SyncSession) -> SyncResult<PullResponse> {
        let bytes = self.send(HttpMethod::Get, PULL_PATH, session, Vec::new())?;
        PullResponse::decode(&bytes)
            .map_err(|e| SyncError::Protocol(format!("failed to decode pull response: {e}")))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles one request and returns the response.
    fn handle(
        &self,
        method: HttpMethod,
        path: &str,
        bearer: Option<&str>,
        body: &[u8],
    ) -> HttpResponse;
}

/// A loopback HTTP client that routes requests directly to a sync server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
    online: AtomicBool,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self {
            server,
            online: AtomicBool::new(true),
        }
    }

    /// Simulates losing or regaining the network.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        if !self.online.load(Ordering::SeqCst) {
            return Err("network unreachable".into());
        }

        let path = request
            .url
            .find("/api/")
            .map(|i| &request.url[i..])
            .unwrap_or(&request.url);
        let bearer = (!request.bearer.is_empty()).then_some(request.bearer.as_str());

        Ok(self
            .server
            .handle(request.method, path, bearer, &request.body))
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;

    struct TestClient {
        response: RwLock<Option<HttpResponse>>,
        last_request: RwLock<Option<HttpRequest>>,
        healthy: AtomicBool,
    }

    impl TestClient {
        fn new() -> Self {
            Self {
                response: RwLock::new(None),
                last_request: RwLock::new(None),
                healthy: AtomicBool::new(true),
            }
        }

        fn set_response(&self, status: u16, body: Vec<u8>) {
            *self.response.write() = Some(HttpResponse::new(status, body));
        }
    }

    impl HttpClient for &TestClient {
        fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
            *self.last_request.write() = Some(request);
            self.response
                .read()
                .clone()
                .ok_or_else(|| "connection refused".into())
        }

        fn is_healthy(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }
    }

    fn session() -> SyncSession {
        SyncSession::new("secret", "device-1")
    }

    #[test]
    fn transport_creation() {
        let client = TestClient::new();
        let transport = HttpTransport::new("https://sync.example.com/", &client);
        assert_eq!(transport.base_url(), "https://sync.example.com");
        assert!(transport.is_connected());

        client.healthy.store(false, Ordering::SeqCst);
        assert!(!transport.is_connected());
    }

    #[test]
    fn transport_not_connected_error() {
        let client = TestClient::new();
        let transport = HttpTransport::new("https://sync.example.com", &client);
        transport.close().unwrap();

        let result = transport.pull(&session());
        assert!(matches!(result, Err(SyncError::NotConnected)));
    }

    #[test]
    fn push_sends_bearer_and_decodes() {
        let client = TestClient::new();
        client.set_response(200, PushResponse::processed(0, Vec::new()).encode().unwrap());
        let transport = HttpTransport::new("https://sync.example.com", &client)
            .with_timeout(Duration::from_secs(5));

        let response = transport
            .push(&session(), &PushRequest::new(Vec::new()))
            .unwrap();
        assert!(response.success);

        let sent = client.last_request.read().clone().unwrap();
        assert_eq!(sent.method, HttpMethod::Post);
        assert_eq!(sent.url, "https://sync.example.com/api/sync/push");
        assert_eq!(sent.bearer, "secret");
        assert_eq!(sent.body, b"[]");
        assert_eq!(sent.timeout, Duration::from_secs(5));
    }

    #[test]
    fn transport_from_config() {
        let client = TestClient::new();
        client.set_response(200, PushResponse::processed(0, Vec::new()).encode().unwrap());
        let config = SyncConfig::new("https://sync.example.com/").with_timeout(Duration::from_secs(7));
        let transport = HttpTransport::from_config(&config, &client);
        assert_eq!(transport.base_url(), "https://sync.example.com");

        transport
            .push(&session(), &PushRequest::new(Vec::new()))
            .unwrap();
        let sent = client.last_request.read().clone().unwrap();
        assert_eq!(sent.timeout, Duration::from_secs(7));
    }

    #[test]
    fn status_codes_map_to_errors() {
        let client = TestClient::new();
        let transport = HttpTransport::new("https://sync.example.com", &client);

        client.set_response(401, ErrorResponse::new("Unauthorized").encode().unwrap());
        match transport.pull(&session()) {
            Err(SyncError::AuthenticationFailed(message)) => assert_eq!(message, "Unauthorized"),
            other => panic!("unexpected {other:?}"),
        }

        client.set_response(400, ErrorResponse::new("bad").encode().unwrap());
        assert!(matches!(transport.pull(&session()), Err(SyncError::Rejected(_))));

        client.set_response(503, b"<html>".to_vec());
        match transport.pull(&session()) {
            Err(SyncError::ServerError(message)) => assert_eq!(message, "HTTP 503"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn client_failure_is_retryable() {
        let client = TestClient::new();
        let transport = HttpTransport::new("https://sync.example.com", &client);
        let err = transport.pull(&session()).unwrap_err();
        assert!(err.is_retryable());
        assert!(err.is_transport());
    }

    #[test]
    fn garbage_body_is_protocol_error() {
        let client = TestClient::new();
        client.set_response(200, b"not json".to_vec());
        let transport = HttpTransport::new("https://sync.example.com", &client);
        assert!(matches!(
            transport.pull(&session()),
            Err(SyncError::Protocol(_))
        ));
    }
}
