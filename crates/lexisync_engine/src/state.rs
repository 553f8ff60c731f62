//! Sync orchestrator.
//!
//! [`SyncEngine`] ties the change queue, the local store and a transport
//! together. It owns no thread of its own: callers (or the
//! [`scheduler`](crate::scheduler)) decide when to flush.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::local_store::{AuxiliaryState, LocalStore};
use crate::queue::ChangeQueue;
use crate::transport::{SyncSession, SyncTransport};
use lexisync_protocol::{
    now_millis, Change, ChangeError, ChangeId, Entity, EntityTable, LocalId, PushRequest,
};
use lexisync_storage::StorageBackend;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// What the engine is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Not syncing; the last cycle (if any) succeeded.
    Idle,
    /// Flushing the change queue.
    Pushing,
    /// Running a full pull.
    Pulling,
    /// The last cycle could not reach the server.
    Offline,
    /// The last cycle failed for another reason.
    Error,
}

impl SyncPhase {
    /// Returns true if a cycle is running.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncPhase::Pushing | SyncPhase::Pulling)
    }
}

/// Observable sync status.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
    /// Current phase.
    pub phase: SyncPhase,
    /// Queued changes.
    pub pending: usize,
    /// Queued changes that failed at least once.
    pub failed: usize,
    /// Error of the last cycle, if it failed.
    pub last_error: Option<String>,
    /// When the queue was last flushed successfully (epoch millis).
    pub last_flush_at: Option<i64>,
    /// Server time of the last full pull (epoch millis).
    pub last_pull_server_time: Option<i64>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Idle,
            pending: 0,
            failed: 0,
            last_error: None,
            last_flush_at: None,
            last_pull_server_time: None,
        }
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Completed flush cycles.
    pub cycles_completed: u64,
    /// Changes acknowledged by the server.
    pub changes_pushed: u64,
    /// Per-change failures reported by the server.
    pub changes_failed: u64,
    /// Entities applied from full pulls.
    pub entities_pulled: u64,
    /// Cycles that could not reach the server.
    pub transport_failures: u64,
}

/// Why a flush was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// The application came to the foreground.
    Foreground,
    /// Connectivity came back.
    NetworkRegained,
    /// The periodic timer fired.
    Periodic,
    /// The user asked for a sync.
    Manual,
}

/// Result of a flush.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
    /// Push requests sent.
    pub batches: usize,
    /// Changes acknowledged and removed from the queue.
    pub acked: usize,
    /// Changes the server rejected; they remain queued.
    pub failed: Vec<ChangeError>,
    /// Changes still queued after the flush.
    pub remaining: usize,
}

/// Result of a full sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FullSyncReport {
    /// Entities written to the local store.
    pub upserted: usize,
    /// Local entities removed because the server no longer has them.
    pub removed: usize,
    /// Entities left alone because a local change is still queued.
    pub skipped_pending: usize,
    /// Server time of the snapshot.
    pub server_time: i64,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The sync engine manages synchronization with a remote server.
pub struct SyncEngine<T: SyncTransport, L: LocalStore, B: StorageBackend> {
    config: SyncConfig,
    transport: Arc<T>,
    store: Arc<L>,
    queue: Arc<ChangeQueue<B>>,
    in_flight: AtomicBool,
    // Held by local mutations and by the full-sync merge.
    local_writes: Mutex<()>,
    status: watch::Sender<SyncStatus>,
    stats: RwLock<SyncStats>,
}

impl<T: SyncTransport, L: LocalStore, B: StorageBackend> SyncEngine<T, L, B> {
    /// Creates a new sync engine.
    pub fn new(config: SyncConfig, transport: T, store: L, queue: ChangeQueue<B>) -> Self {
        Self::with_shared(config, Arc::new(transport), Arc::new(store), Arc::new(queue))
    }

    /// Creates a sync engine over shared components.
    pub fn with_shared(
        config: SyncConfig,
        transport: Arc<T>,
        store: Arc<L>,
        queue: Arc<ChangeQueue<B>>,
    ) -> Self {
        let initial = SyncStatus {
            pending: queue.len(),
            failed: queue.failed_count(),
            last_pull_server_time: queue.last_pull(),
            ..SyncStatus::default()
        };
        let (status, _) = watch::channel(initial);
        Self {
            config,
            transport,
            store,
            queue,
            in_flight: AtomicBool::new(false),
            local_writes: Mutex::new(()),
            status,
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the change queue.
    pub fn queue(&self) -> &ChangeQueue<B> {
        &self.queue
    }

    /// Returns the local store.
    pub fn store(&self) -> &L {
        &self.store
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the current status.
    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Subscribes to status changes.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Returns the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns true until a full sync has completed on this device.
    ///
    /// The watermark is persisted in the change queue, so it survives
    /// restarts.
    pub fn needs_bootstrap(&self) -> bool {
        self.queue.last_pull().is_none()
    }

    /// Saves a new entity locally and queues its creation.
    pub fn create(&self, entity: Entity) -> SyncResult<Change> {
        let change = Change::create(&entity, now_millis())?;
        let _writes = self.local_writes.lock();
        self.store.upsert(entity)?;
        self.record(change)
    }

    /// Saves a modified entity locally and queues the update.
    pub fn update(&self, entity: Entity) -> SyncResult<Change> {
        let change = Change::update(&entity, now_millis())?;
        let _writes = self.local_writes.lock();
        self.store.upsert(entity)?;
        self.record(change)
    }

    /// Removes an entity locally and queues the delete.
    pub fn delete(&self, table: EntityTable, local_id: LocalId) -> SyncResult<Change> {
        let change = Change::delete(table, local_id.clone(), now_millis())?;
        let _writes = self.local_writes.lock();
        self.store.remove(table, &local_id)?;
        self.record(change)
    }

    fn record(&self, change: Change) -> SyncResult<Change> {
        self.queue.enqueue_change(change.clone())?;
        self.refresh_counts();
        Ok(change)
    }

    fn refresh_counts(&self) {
        let pending = self.queue.len();
        let failed = self.queue.failed_count();
        self.status.send_modify(|s| {
            s.pending = pending;
            s.failed = failed;
        });
    }

    fn begin(&self, phase: SyncPhase) -> SyncResult<InFlight<'_>> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::AlreadyInFlight);
        }
        self.status.send_modify(|s| s.phase = phase);
        Ok(InFlight(&self.in_flight))
    }

    fn finish<R>(
        &self,
        result: SyncResult<R>,
        on_success: impl FnOnce(&mut SyncStatus),
    ) -> SyncResult<R> {
        let pending = self.queue.len();
        let failed = self.queue.failed_count();

        if let Err(e) = &result {
            if e.is_transport() {
                self.stats.write().transport_failures += 1;
            }
        }

        self.status.send_modify(|s| {
            s.pending = pending;
            s.failed = failed;
            match &result {
                Ok(_) => {
                    s.phase = SyncPhase::Idle;
                    s.last_error = None;
                    on_success(s);
                }
                Err(e) => {
                    s.phase = if e.is_transport() {
                        SyncPhase::Offline
                    } else {
                        SyncPhase::Error
                    };
                    s.last_error = Some(e.to_string());
                }
            }
        });
        result
    }

    /// Pushes every queued change.
    ///
    /// Batches are sent in queue order. Acknowledged changes leave the
    /// queue; changes the server reports as failed stay queued with their
    /// reason and are retried on the next flush. A transport failure or a
    /// whole-request rejection stops the cycle with nothing acknowledged for
    /// the batch in flight.
    pub fn flush(&self, session: &SyncSession) -> SyncResult<FlushReport> {
        let _guard = self.begin(SyncPhase::Pushing)?;
        let result = self.push_all(session);
        if let Ok(report) = &result {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            stats.changes_pushed += report.acked as u64;
            stats.changes_failed += report.failed.len() as u64;
        }
        self.finish(result, |s| s.last_flush_at = Some(now_millis()))
    }

    fn push_all(&self, session: &SyncSession) -> SyncResult<FlushReport> {
        let mut report = FlushReport::default();
        let mut after = None;

        loop {
            let batch = self
                .queue
                .next_batch_after(after, self.config.push_batch_size);
            let Some(last) = batch.last() else {
                break;
            };
            after = Some(last.seq);

            let request = PushRequest::new(batch.iter().map(|e| e.change.clone()).collect());
            tracing::debug!(
                device_id = %session.device_id,
                changes = request.len(),
                "pushing batch"
            );

            let response = self.transport.push(session, &request)?;
            if !response.success {
                return Err(SyncError::Rejected("server did not process the batch".into()));
            }
            report.batches += 1;

            let sent: HashSet<&ChangeId> = request.changes.iter().map(|c| &c.id).collect();
            let failed = response.failed_ids();
            let acked: Vec<ChangeId> = request
                .changes
                .iter()
                .filter(|c| !failed.contains(&c.id))
                .map(|c| c.id.clone())
                .collect();
            report.acked += self.queue.ack(&acked)?;

            for error in &response.errors {
                if !sent.contains(&error.change_id) {
                    tracing::warn!(change_id = %error.change_id, "error for a change not in the batch");
                    continue;
                }
                self.queue.mark_failed(&error.change_id, &error.error)?;
                report.failed.push(error.clone());
            }
        }

        report.remaining = self.queue.len();
        tracing::info!(
            batches = report.batches,
            acked = report.acked,
            failed = report.failed.len(),
            remaining = report.remaining,
            "flush complete"
        );
        Ok(report)
    }

    /// Handles a sync trigger by flushing the queue.
    ///
    /// Errors are not returned; they are recorded in the status.
    pub fn on_trigger(&self, session: &SyncSession, trigger: SyncTrigger) -> Option<FlushReport> {
        tracing::debug!(?trigger, "sync triggered");
        match self.flush(session) {
            Ok(report) => Some(report),
            Err(SyncError::AlreadyInFlight) => {
                tracing::debug!(?trigger, "flush already running");
                None
            }
            Err(e) => {
                tracing::warn!(?trigger, error = %e, "flush failed");
                None
            }
        }
    }

    /// Replaces local data with the server's snapshot.
    ///
    /// Entities with a queued local change are left untouched, both when the
    /// snapshot has them and when it does not. Local mutations wait while
    /// the snapshot is merged, and the queue is consulted per entity, so an
    /// edit queued during the merge is never overwritten or removed.
    ///
    /// On success the snapshot's server time is persisted as the bootstrap
    /// watermark.
    pub fn full_sync(&self, session: &SyncSession) -> SyncResult<FullSyncReport> {
        let _guard = self.begin(SyncPhase::Pulling)?;
        let result = self.pull_all(session);
        if let Ok(report) = &result {
            self.stats.write().entities_pulled += report.upserted as u64;
        }
        let server_time = result.as_ref().map(|r| r.server_time).unwrap_or_default();
        self.finish(result, |s| s.last_pull_server_time = Some(server_time))
    }

    fn pull_all(&self, session: &SyncSession) -> SyncResult<FullSyncReport> {
        let snapshot = self.transport.pull(session)?;
        let _writes = self.local_writes.lock();
        let mut report = FullSyncReport {
            server_time: snapshot.server_time,
            ..Default::default()
        };

        let mut seen: HashSet<(EntityTable, LocalId)> = HashSet::new();
        for entity in snapshot.entities() {
            let key = (entity.table(), entity.local_id().clone());
            let pending = self.queue.has_pending(key.0, &key.1);
            seen.insert(key);
            if pending {
                report.skipped_pending += 1;
                continue;
            }
            self.store.upsert(entity)?;
            report.upserted += 1;
        }

        for table in EntityTable::ALL.into_iter().rev() {
            for local_id in self.store.local_ids(table)? {
                if seen.contains(&(table, local_id.clone()))
                    || self.queue.has_pending(table, &local_id)
                {
                    continue;
                }
                self.store.remove(table, &local_id)?;
                report.removed += 1;
            }
        }

        self.store.put_auxiliary(AuxiliaryState {
            gamification: snapshot.gamification,
            achievements: snapshot.achievements,
            settings: snapshot.settings,
        })?;
        self.queue.record_pull(report.server_time)?;

        tracing::info!(
            upserted = report.upserted,
            removed = report.removed,
            skipped_pending = report.skipped_pending,
            server_time = report.server_time,
            "full sync complete"
        );
        Ok(report)
    }
}
