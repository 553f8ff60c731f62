//! # LexiSync Server
//!
//! Server side of LexiSync: accepts pushed change batches from devices,
//! applies them to a per-user authoritative store and serves full snapshots
//! for devices that need to rehydrate.
//!
//! This crate provides:
//! - The push reconciler: in-order, per-change application with isolated
//!   failures, parent resolution and tombstones
//! - The snapshot provider for pull
//! - Authentication (HMAC-SHA256 signed bearer tokens)
//! - A transport-agnostic router mapping requests to JSON replies
//! - The store seam ([`ServerStore`]) and an in-memory implementation
//!
//! # Identity
//!
//! Clients address entities by local ids they generate. The server assigns
//! its own [`ServerId`] per row and stores foreign keys as server ids; both
//! directions of translation happen here and never on the client.
//!
//! # Authentication
//!
//! ```rust
//! use lexisync_server::{AuthConfig, ServerConfig, SyncServer, TokenAuthenticator, UserId};
//!
//! let secret = b"my-secure-secret-32-bytes-long!".to_vec();
//! let server = SyncServer::from_config(ServerConfig::new().with_auth(secret.clone())).unwrap();
//!
//! let issuer = TokenAuthenticator::new(AuthConfig::new(secret));
//! let token = issuer.issue_token(&UserId::new("alice")).unwrap();
//! let reply = server.handle_request("GET", "/api/sync/pull", Some(&token), b"");
//! assert_eq!(reply.status, 200);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod handler;
mod reconciler;
mod server;
mod snapshot;
mod store;

pub use auth::{
    AuthConfig, Authenticator, StaticAuthenticator, TokenAuthenticator, UserId, VerifiedToken,
};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use reconciler::{ReconcileError, ReconcileResult, Reconciler, UserContext};
pub use server::{ServerReply, SyncServer, PULL_ROUTE, PUSH_ROUTE};
pub use snapshot::SnapshotProvider;
pub use store::{MemoryServerStore, ServerId, ServerRecord, ServerStore, StoredRow, UserState};
