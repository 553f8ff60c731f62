//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use lexisync_protocol::{PullResponse, PushRequest, PushResponse};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Credentials and identity for one signed-in device.
///
/// Passed into every orchestrator call; the engine keeps no notion of a
/// current user.
#[derive(Clone, PartialEq, Eq)]
pub struct SyncSession {
    /// Bearer credential sent with every request.
    pub bearer: String,
    /// Identifier of this device, for logs.
    pub device_id: String,
}

impl SyncSession {
    /// Creates a session.
    pub fn new(bearer: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            bearer: bearer.into(),
            device_id: device_id.into(),
        }
    }
}

impl fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncSession")
            .field("bearer", &"<redacted>")
            .field("device_id", &self.device_id)
            .finish()
    }
}

/// A sync transport handles network communication with the sync server.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-process loopback, mock for testing).
pub trait SyncTransport: Send + Sync {
    /// Sends a batch of changes.
    fn push(&self, session: &SyncSession, request: &PushRequest) -> SyncResult<PushResponse>;

    /// Fetches the full snapshot of the session user's data.
    fn pull(&self, session: &SyncSession) -> SyncResult<PullResponse>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the transport connection.
    fn close(&self) -> SyncResult<()>;
}

/// A scriptable transport for testing.
///
/// Push replies are taken from a one-shot script first, then from the sticky
/// response, and otherwise every change is acknowledged.
#[derive(Debug, Default)]
pub struct MockTransport {
    connected: AtomicBool,
    push_script: Mutex<VecDeque<SyncResult<PushResponse>>>,
    push_response: Mutex<Option<PushResponse>>,
    pull_response: Mutex<Option<PullResponse>>,
    push_delay: Mutex<Option<Duration>>,
    pushed: Mutex<Vec<PushRequest>>,
    pulls: Mutex<usize>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            ..Default::default()
        }
    }

    /// Queues a reply for the next push.
    pub fn script_push(&self, reply: SyncResult<PushResponse>) {
        self.push_script.lock().push_back(reply);
    }

    /// Sets the reply for every push without a scripted reply.
    pub fn set_push_response(&self, response: PushResponse) {
        *self.push_response.lock() = Some(response);
    }

    /// Sets the pull response.
    pub fn set_pull_response(&self, response: PullResponse) {
        *self.pull_response.lock() = Some(response);
    }

    /// Makes every push sleep before replying.
    pub fn set_push_delay(&self, delay: Duration) {
        *self.push_delay.lock() = Some(delay);
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Returns every push request received so far.
    pub fn pushed(&self) -> Vec<PushRequest> {
        self.pushed.lock().clone()
    }

    /// Returns the number of pulls served.
    pub fn pull_count(&self) -> usize {
        *self.pulls.lock()
    }
}

impl SyncTransport for MockTransport {
    fn push(&self, _session: &SyncSession, request: &PushRequest) -> SyncResult<PushResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        let delay = *self.push_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        self.pushed.lock().push(request.clone());

        if let Some(reply) = self.push_script.lock().pop_front() {
            return reply;
        }
        Ok(self
            .push_response
            .lock()
            .clone()
            .unwrap_or_else(|| PushResponse::processed(request.len(), Vec::new())))
    }

    fn pull(&self, _session: &SyncSession) -> SyncResult<PullResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        *self.pulls.lock() += 1;
        self.pull_response
            .lock()
            .clone()
            .ok_or_else(|| SyncError::Protocol("no mock pull response set".into()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
