//! Request handlers for sync endpoints.

use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::reconciler::{Reconciler, UserContext};
use crate::snapshot::SnapshotProvider;
use crate::store::ServerStore;
use lexisync_protocol::{now_millis, PullResponse, PushRequest, PushResponse};
use std::sync::Arc;

/// Shared state for request handling.
pub struct HandlerContext<S: ServerStore> {
    /// Server configuration.
    pub config: ServerConfig,
    /// Authoritative store.
    pub store: Arc<S>,
    /// Resolves bearer credentials.
    pub authenticator: Arc<dyn Authenticator>,
}

impl<S: ServerStore> HandlerContext<S> {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, store: Arc<S>, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            config,
            store,
            authenticator,
        }
    }

    /// Authenticates a request and stamps it with the server clock.
    pub fn user_context(&self, bearer: Option<&str>) -> ServerResult<UserContext> {
        let user_id = self.authenticator.authenticate(bearer).map_err(|e| {
            tracing::debug!(error = %e, "authentication failed");
            e
        })?;
        Ok(UserContext::new(user_id, now_millis()))
    }
}

/// Handler for push and pull requests.
pub struct RequestHandler<S: ServerStore> {
    context: Arc<HandlerContext<S>>,
    reconciler: Reconciler<S>,
    snapshots: SnapshotProvider<S>,
}

impl<S: ServerStore> RequestHandler<S> {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext<S>>) -> Self {
        let reconciler = Reconciler::new(Arc::clone(&context.store));
        let snapshots = SnapshotProvider::new(Arc::clone(&context.store));
        Self {
            context,
            reconciler,
            snapshots,
        }
    }

    /// Returns the shared context.
    pub fn context(&self) -> &Arc<HandlerContext<S>> {
        &self.context
    }

    /// Handles a push request body.
    ///
    /// Authentication happens before the body is looked at. A body that does
    /// not decode, or holds more changes than allowed, rejects the whole
    /// request with nothing applied.
    pub fn handle_push(&self, bearer: Option<&str>, body: &[u8]) -> ServerResult<PushResponse> {
        let ctx = self.context.user_context(bearer)?;

        let request = PushRequest::decode(body)
            .map_err(|e| ServerError::InvalidRequest(format!("malformed push body: {e}")))?;

        let max = self.context.config.max_push_batch;
        if request.len() > max {
            return Err(ServerError::InvalidRequest(format!(
                "too many changes: {} > {max}",
                request.len()
            )));
        }

        self.reconciler.apply(&ctx, &request.changes)
    }

    /// Handles a pull request.
    pub fn handle_pull(&self, bearer: Option<&str>) -> ServerResult<PullResponse> {
        let ctx = self.context.user_context(bearer)?;
        self.snapshots.snapshot(&ctx)
    }
}
