//! # LexiSync Engine
//!
//! Client side of LexiSync: keeps a device-local store usable offline and
//! moves its changes to the server when connectivity allows.
//!
//! This crate provides:
//! - A durable FIFO change queue on a checksummed record log
//! - The local store seam ([`LocalStore`]) and an in-memory implementation
//! - The transport seam ([`SyncTransport`]) with an HTTP implementation over
//!   a pluggable [`HttpClient`], a loopback client and a mock
//! - The sync orchestrator ([`SyncEngine`]): flush, full sync, local
//!   mutations, observable status
//! - A tokio scheduler for periodic and event-driven flushes
//!
//! ## Model
//!
//! Every local mutation is written to the local store and then queued.
//! A flush pushes the queue in order and in batches; the server applies each
//! change independently and reports per-change failures, which stay queued
//! and are retried on the next flush. A new device first runs a full sync to
//! rehydrate its local store.
//!
//! ## Key Invariants
//!
//! - Queued changes are never reordered, split or coalesced
//! - Only an acknowledgement removes a change from the queue
//! - At most one flush or full sync runs at a time
//! - A full sync never overwrites an entity with a queued local change

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod http;
mod local_store;
mod queue;
pub mod scheduler;
mod state;
mod transport;

pub use config::{RetryConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use http::{
    HttpClient, HttpMethod, HttpRequest, HttpResponse, HttpTransport, LoopbackClient,
    LoopbackServer, PULL_PATH, PUSH_PATH,
};
pub use local_store::{AuxiliaryState, LocalStore, MemoryLocalStore};
pub use queue::{ChangeQueue, QueueConfig, QueueEntry};
pub use scheduler::{spawn_scheduler, SchedulerHandle};
pub use state::{
    FlushReport, FullSyncReport, SyncEngine, SyncPhase, SyncStats, SyncStatus, SyncTrigger,
};
pub use transport::{MockTransport, SyncSession, SyncTransport};
