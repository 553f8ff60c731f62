//! Background flush scheduler.
//!
//! Runs a tokio task that flushes the queue whenever a trigger arrives and,
//! if configured, on a periodic interval. After consecutive transport
//! failures the periodic wait grows per [`RetryConfig`]; explicit triggers
//! always flush immediately.
//!
//! A device that has never completed a full sync pulls a snapshot when the
//! scheduler starts, and again before each flush until one succeeds.

use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use crate::local_store::LocalStore;
use crate::state::{FlushReport, SyncEngine, SyncTrigger};
use crate::transport::{SyncSession, SyncTransport};
use lexisync_storage::StorageBackend;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Handle to a running scheduler.
///
/// Dropping the handle stops the scheduler after its current flush.
pub struct SchedulerHandle {
    triggers: mpsc::UnboundedSender<SyncTrigger>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Requests a flush. Returns false if the scheduler has stopped.
    pub fn trigger(&self, trigger: SyncTrigger) -> bool {
        self.triggers.send(trigger).is_ok()
    }

    /// Stops the scheduler and waits for it to finish.
    pub async fn shutdown(self) {
        drop(self.triggers);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "sync scheduler task failed");
        }
    }
}

/// Spawns the scheduler on the current tokio runtime.
///
/// Flushes run on the blocking pool because transports and queue writes
/// block.
pub fn spawn_scheduler<T, L, B>(
    engine: Arc<SyncEngine<T, L, B>>,
    session: SyncSession,
) -> SchedulerHandle
where
    T: SyncTransport + 'static,
    L: LocalStore + 'static,
    B: StorageBackend + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let interval = engine.config().sync_interval;
    let retry = engine.config().retry.clone();
    let task = tokio::spawn(run(engine, session, rx, interval, retry));
    SchedulerHandle { triggers: tx, task }
}

async fn run<T, L, B>(
    engine: Arc<SyncEngine<T, L, B>>,
    session: SyncSession,
    mut triggers: mpsc::UnboundedReceiver<SyncTrigger>,
    interval: Option<Duration>,
    retry: RetryConfig,
) where
    T: SyncTransport + 'static,
    L: LocalStore + 'static,
    B: StorageBackend + 'static,
{
    let mut failures = 0u32;
    tracing::info!(?interval, device_id = %session.device_id, "sync scheduler started");

    if engine.needs_bootstrap() {
        let boot_engine = Arc::clone(&engine);
        let boot_session = session.clone();
        if let Err(e) =
            tokio::task::spawn_blocking(move || bootstrap(&boot_engine, &boot_session)).await
        {
            tracing::error!(error = %e, "bootstrap task panicked");
        }
    }

    loop {
        let wait = interval.unwrap_or_default() + retry.delay_for_attempt(failures);
        let trigger = tokio::select! {
            received = triggers.recv() => match received {
                Some(trigger) => trigger,
                None => break,
            },
            _ = tokio::time::sleep(wait), if interval.is_some() => SyncTrigger::Periodic,
        };

        let flush_engine = Arc::clone(&engine);
        let flush_session = session.clone();
        let outcome =
            tokio::task::spawn_blocking(move || cycle(&flush_engine, &flush_session)).await;

        match outcome {
            Ok(Ok(report)) => {
                failures = 0;
                tracing::debug!(?trigger, acked = report.acked, "scheduled flush done");
            }
            Ok(Err(SyncError::AlreadyInFlight)) => {}
            Ok(Err(e)) if e.is_transport() => {
                failures = failures.saturating_add(1);
                tracing::warn!(
                    ?trigger,
                    failures,
                    error = %e,
                    "flush could not reach server"
                );
            }
            Ok(Err(e)) => {
                tracing::warn!(?trigger, error = %e, "scheduled flush failed");
            }
            Err(e) => {
                tracing::error!(error = %e, "flush task panicked");
            }
        }
    }

    tracing::info!("sync scheduler stopped");
}

fn bootstrap<T, L, B>(engine: &SyncEngine<T, L, B>, session: &SyncSession)
where
    T: SyncTransport,
    L: LocalStore,
    B: StorageBackend,
{
    match engine.full_sync(session) {
        Ok(report) => tracing::info!(
            upserted = report.upserted,
            server_time = report.server_time,
            "bootstrap pull complete"
        ),
        Err(e) => tracing::warn!(error = %e, "bootstrap pull failed"),
    }
}

fn cycle<T, L, B>(engine: &SyncEngine<T, L, B>, session: &SyncSession) -> SyncResult<FlushReport>
where
    T: SyncTransport,
    L: LocalStore,
    B: StorageBackend,
{
    if engine.needs_bootstrap() {
        bootstrap(engine, session);
    }
    engine.flush(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::local_store::MemoryLocalStore;
    use crate::queue::{ChangeQueue, QueueConfig};
    use crate::transport::MockTransport;
    use lexisync_protocol::{Book, Entity, PullResponse};
    use lexisync_storage::InMemoryBackend;

    type TestEngine = SyncEngine<MockTransport, MemoryLocalStore, InMemoryBackend>;

    fn engine(config: SyncConfig) -> Arc<TestEngine> {
        engine_on(config, InMemoryBackend::new())
    }

    fn engine_on(config: SyncConfig, backend: InMemoryBackend) -> Arc<TestEngine> {
        let queue = ChangeQueue::open(backend, QueueConfig::default()).unwrap();
        Arc::new(SyncEngine::new(
            config,
            MockTransport::new(),
            MemoryLocalStore::new(),
            queue,
        ))
    }

    fn book(id: &str) -> Entity {
        Entity::Book(Book {
            local_id: id.into(),
            name: "Vocab".into(),
            language: "it".into(),
            description: None,
            cover_color: None,
        })
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn manual_trigger_flushes() {
        let engine = engine(SyncConfig::new("memory://"));
        engine.create(book("b1")).unwrap();

        let handle = spawn_scheduler(Arc::clone(&engine), SyncSession::new("t", "device-1"));
        assert!(handle.trigger(SyncTrigger::Manual));

        wait_until(|| engine.queue().is_empty()).await;
        handle.shutdown().await;
        assert_eq!(engine.transport().pushed().len(), 1);
    }

    #[tokio::test]
    async fn periodic_flushes_without_triggers() {
        let config = SyncConfig::new("memory://")
            .with_sync_interval(Duration::from_millis(20))
            .with_retry(RetryConfig::no_backoff());
        let engine = engine(config);

        let handle = spawn_scheduler(Arc::clone(&engine), SyncSession::new("t", "device-1"));
        engine.create(book("b1")).unwrap();

        wait_until(|| engine.queue().is_empty()).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn recovers_after_network_returns() {
        let config = SyncConfig::new("memory://")
            .with_sync_interval(Duration::from_millis(10))
            .with_retry(RetryConfig::new(Duration::from_millis(5)).with_jitter(false));
        let engine = engine(config);
        engine.transport().set_connected(false);
        engine.create(book("b1")).unwrap();

        let handle = spawn_scheduler(Arc::clone(&engine), SyncSession::new("t", "device-1"));
        wait_until(|| engine.stats().transport_failures >= 2).await;
        assert_eq!(engine.queue().len(), 1);

        engine.transport().set_connected(true);
        assert!(handle.trigger(SyncTrigger::NetworkRegained));
        wait_until(|| engine.queue().is_empty()).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn fresh_device_bootstraps_on_start() {
        let engine = engine(SyncConfig::new("memory://"));
        engine.transport().set_pull_response(PullResponse {
            server_time: 42,
            ..Default::default()
        });

        let handle = spawn_scheduler(Arc::clone(&engine), SyncSession::new("t", "device-1"));
        wait_until(|| !engine.needs_bootstrap()).await;
        handle.shutdown().await;

        assert_eq!(engine.transport().pull_count(), 1);
        assert_eq!(engine.status().last_pull_server_time, Some(42));
    }

    #[tokio::test]
    async fn restarted_device_skips_bootstrap() {
        let backend = InMemoryBackend::new();
        {
            let first = engine_on(SyncConfig::new("memory://"), backend.clone());
            first.transport().set_pull_response(PullResponse::default());
            first.full_sync(&SyncSession::new("t", "device-1")).unwrap();
        }

        let engine = engine_on(SyncConfig::new("memory://"), backend);
        assert!(!engine.needs_bootstrap());
        engine.create(book("b1")).unwrap();

        let handle = spawn_scheduler(Arc::clone(&engine), SyncSession::new("t", "device-1"));
        assert!(handle.trigger(SyncTrigger::Foreground));
        wait_until(|| engine.queue().is_empty()).await;
        handle.shutdown().await;

        assert_eq!(engine.transport().pull_count(), 0);
    }
}
