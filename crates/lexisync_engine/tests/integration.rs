//! Integration tests for the sync engine against a real server.
//!
//! Devices talk to an in-process `SyncServer` through the HTTP transport and
//! a loopback client, so every request goes through JSON encoding, routing,
//! authentication and status mapping.

use lexisync_engine::{
    ChangeQueue, HttpMethod, HttpResponse, HttpTransport, LoopbackClient, LoopbackServer,
    MemoryLocalStore, QueueConfig, SyncConfig, SyncEngine, SyncError, SyncSession,
};
use lexisync_protocol::{Book, Chapter, Entity, EntityTable, LearningProgress, VocabularyItem};
use lexisync_server::{ServerConfig, StaticAuthenticator, SyncServer};
use lexisync_storage::{FileBackend, InMemoryBackend, StorageBackend};
use std::sync::Arc;

/// Exposes a shared server to loopback clients.
struct Backend(Arc<SyncServer>);

impl LoopbackServer for Backend {
    fn handle(
        &self,
        method: HttpMethod,
        path: &str,
        bearer: Option<&str>,
        body: &[u8],
    ) -> HttpResponse {
        let reply = self.0.handle_request(method.as_str(), path, bearer, body);
        HttpResponse::new(reply.status, reply.body)
    }
}

type Transport = HttpTransport<LoopbackClient<Backend>>;
type Device<B> = SyncEngine<Transport, MemoryLocalStore, B>;

fn server() -> Arc<SyncServer> {
    let auth = StaticAuthenticator::new()
        .with_token("alice-phone", "alice")
        .with_token("alice-tablet", "alice")
        .with_token("bob-phone", "bob");
    Arc::new(SyncServer::new(ServerConfig::default(), Arc::new(auth)))
}

fn device_with<B: StorageBackend>(server: &Arc<SyncServer>, backend: B) -> Device<B> {
    let config = SyncConfig::new("https://sync.example.test").with_push_batch_size(2);
    let client = LoopbackClient::new(Backend(Arc::clone(server)));
    let transport = HttpTransport::from_config(&config, client);
    let queue = ChangeQueue::open(backend, QueueConfig::default()).unwrap();
    SyncEngine::new(
        config,
        transport,
        MemoryLocalStore::new(),
        queue,
    )
}

fn device(server: &Arc<SyncServer>) -> Device<InMemoryBackend> {
    device_with(server, InMemoryBackend::new())
}

fn session(token: &str) -> SyncSession {
    SyncSession::new(token, token)
}

fn book(id: &str, name: &str) -> Entity {
    Entity::Book(Book {
        local_id: id.into(),
        name: name.into(),
        language: "pt".into(),
        description: None,
        cover_color: Some("#3366ff".into()),
    })
}

fn chapter(id: &str, book_id: &str) -> Entity {
    Entity::Chapter(Chapter {
        local_id: id.into(),
        local_book_id: book_id.into(),
        name: "Capítulo".into(),
        order: 1,
    })
}

fn item(id: &str, book_id: &str, source: &str) -> Entity {
    Entity::VocabularyItem(VocabularyItem {
        local_id: id.into(),
        local_book_id: book_id.into(),
        local_chapter_id: None,
        local_section_id: None,
        source_text: source.into(),
        target_text: "translation".into(),
        notes: None,
        image_ref: None,
    })
}

fn progress(id: &str, item_id: &str, ease: f64) -> Entity {
    Entity::LearningProgress(LearningProgress {
        local_id: id.into(),
        local_vocabulary_item_id: item_id.into(),
        ease_factor: ease,
        interval_days: 3,
        repetitions: 1,
        next_review_at: Some(1_700_000_000_000),
        last_review_at: Some(1_699_000_000_000),
        total_reviews: 4,
        correct_reviews: 3,
    })
}

#[test]
fn second_device_converges_after_full_sync() {
    let server = server();
    let phone = device(&server);
    let tablet = device(&server);

    phone.create(book("b1", "Português")).unwrap();
    phone.create(chapter("c1", "b1")).unwrap();
    phone.create(item("v1", "b1", "obrigado")).unwrap();
    phone.create(progress("p1", "v1", 2.5)).unwrap();

    let report = phone.flush(&session("alice-phone")).unwrap();
    assert_eq!(report.acked, 4);
    assert_eq!(report.batches, 2);
    assert!(report.failed.is_empty());
    assert!(phone.queue().is_empty());

    assert!(tablet.needs_bootstrap());
    let pulled = tablet.full_sync(&session("alice-tablet")).unwrap();
    assert_eq!(pulled.upserted, 4);
    assert!(!tablet.needs_bootstrap());

    for table in EntityTable::ALL {
        assert_eq!(tablet.store().all(table), phone.store().all(table), "{table}");
    }
}

#[test]
fn deletions_propagate_to_other_devices() {
    let server = server();
    let phone = device(&server);
    let tablet = device(&server);

    phone.create(book("b1", "Keep")).unwrap();
    phone.create(book("b2", "Drop")).unwrap();
    phone.flush(&session("alice-phone")).unwrap();
    tablet.full_sync(&session("alice-tablet")).unwrap();
    assert_eq!(tablet.store().count(EntityTable::Books), 2);

    phone.delete(EntityTable::Books, "b2".into()).unwrap();
    phone.flush(&session("alice-phone")).unwrap();

    let report = tablet.full_sync(&session("alice-tablet")).unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(tablet.store().all(EntityTable::Books), vec![book("b1", "Keep")]);
}

#[test]
fn rejected_change_stays_queued_until_parent_arrives() {
    let server = server();
    let phone = device(&server);
    let s = session("alice-phone");

    let orphan = phone.create(chapter("c1", "b-late")).unwrap();
    phone.create(book("b1", "First")).unwrap();

    let report = phone.flush(&s).unwrap();
    assert_eq!(report.acked, 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].change_id, orphan.id);
    assert_eq!(report.remaining, 1);

    let entry = &phone.queue().entries()[0];
    assert_eq!(entry.change.id, orphan.id);
    assert_eq!(entry.attempts, 1);
    assert!(entry.last_error.as_deref().unwrap_or("").contains("b-late"));

    // The parent is queued behind the chapter, so one more round is needed.
    phone.create(book("b-late", "Second")).unwrap();
    let report = phone.flush(&s).unwrap();
    assert_eq!(report.acked, 1);
    assert_eq!(report.remaining, 1);

    let report = phone.flush(&s).unwrap();
    assert_eq!(report.acked, 1);
    assert_eq!(report.remaining, 0);
    assert_eq!(phone.status().failed, 0);
}

#[test]
fn offline_flush_keeps_queue_and_recovers() {
    let server = server();
    let phone = device(&server);
    let s = session("alice-phone");

    phone.create(book("b1", "Offline")).unwrap();
    phone.transport().client().set_online(false);

    let err = phone.flush(&s).unwrap_err();
    assert!(err.is_retryable(), "{err}");
    assert_eq!(phone.queue().len(), 1);
    assert!(phone.status().last_error.is_some());

    phone.transport().client().set_online(true);
    let report = phone.flush(&s).unwrap();
    assert_eq!(report.acked, 1);
    assert!(phone.queue().is_empty());
}

#[test]
fn bad_credentials_reject_without_acking() {
    let server = server();
    let phone = device(&server);

    phone.create(book("b1", "Secret")).unwrap();
    let err = phone.flush(&session("expired-token")).unwrap_err();
    assert!(matches!(err, SyncError::AuthenticationFailed(_)), "{err}");
    assert!(!err.is_retryable());
    assert_eq!(phone.queue().len(), 1);

    let bob = device(&server);
    bob.full_sync(&session("bob-phone")).unwrap();
    assert_eq!(bob.store().count(EntityTable::Books), 0);
}

#[test]
fn users_are_isolated() {
    let server = server();
    let alice = device(&server);
    let bob = device(&server);

    alice.create(book("shared-id", "Alice's")).unwrap();
    alice.flush(&session("alice-phone")).unwrap();
    bob.create(book("shared-id", "Bob's")).unwrap();
    bob.flush(&session("bob-phone")).unwrap();

    let tablet = device(&server);
    tablet.full_sync(&session("alice-tablet")).unwrap();
    assert_eq!(
        tablet.store().all(EntityTable::Books),
        vec![book("shared-id", "Alice's")]
    );
}

#[test]
fn queued_changes_survive_restart() {
    let server = server();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.log");

    {
        let phone = device_with(&server, FileBackend::open(&path).unwrap());
        phone.create(book("b1", "Before restart")).unwrap();
        phone.create(chapter("c1", "b1")).unwrap();
        assert_eq!(phone.queue().len(), 2);

        let pulled = phone.full_sync(&session("alice-phone")).unwrap();
        assert_eq!(pulled.removed, 0);
        assert_eq!(phone.store().count(EntityTable::Chapters), 1);
    }

    let phone = device_with(&server, FileBackend::open(&path).unwrap());
    assert_eq!(phone.queue().len(), 2);
    assert!(!phone.needs_bootstrap());

    let report = phone.flush(&session("alice-phone")).unwrap();
    assert_eq!(report.acked, 2);

    let tablet = device(&server);
    tablet.full_sync(&session("alice-tablet")).unwrap();
    assert_eq!(tablet.store().count(EntityTable::Chapters), 1);
}
