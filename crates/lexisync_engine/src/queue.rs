//! Durable FIFO queue of local changes.
//!
//! Every mutation made while offline lands here first. The queue is an
//! append-only record log: enqueues, acknowledgements and failures are each
//! one CBOR record, and replaying the log on open rebuilds the pending set
//! in its original order. The server time of the last completed full pull
//! is kept in the same log.
//!
//! ## Invariants
//!
//! - An enqueued change is durable before `enqueue` returns
//! - Changes are never reordered, split or coalesced
//! - A failed change stays queued; only an acknowledgement removes it

use crate::error::{SyncError, SyncResult};
use lexisync_protocol::{Change, ChangeData, ChangeId, EntityTable, LocalId, Operation};
use lexisync_storage::{RecordLog, StorageBackend};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Tuning for the change queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Minimum number of dead records before the log is compacted.
    pub compact_threshold: usize,
}

impl QueueConfig {
    /// Sets the compaction threshold.
    pub fn with_compact_threshold(mut self, threshold: usize) -> Self {
        self.compact_threshold = threshold;
        self
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            compact_threshold: 256,
        }
    }
}

/// A change waiting to be pushed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Position in the queue; strictly increasing.
    pub seq: u64,
    /// The queued change.
    pub change: Change,
    /// Number of times the server reported this change as failed.
    pub attempts: u32,
    /// Most recent failure reason.
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
enum QueueRecord {
    Enqueued(QueueEntry),
    Acked(Vec<ChangeId>),
    Failed { change_id: ChangeId, error: String },
    Pulled { server_time: i64 },
}

impl QueueRecord {
    fn encode(&self) -> SyncResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| SyncError::Codec(e.to_string()))?;
        Ok(buf)
    }

    fn decode(bytes: &[u8]) -> SyncResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| SyncError::Codec(e.to_string()))
    }
}

struct QueueState<B: StorageBackend> {
    log: RecordLog<B>,
    entries: Vec<QueueEntry>,
    next_seq: u64,
    log_records: usize,
    last_pull: Option<i64>,
}

impl<B: StorageBackend> QueueState<B> {
    fn append(&mut self, record: &QueueRecord) -> SyncResult<()> {
        self.log.append(&record.encode()?)?;
        self.log_records += 1;
        Ok(())
    }

    fn live_records(&self) -> usize {
        self.entries.len() + usize::from(self.last_pull.is_some())
    }

    fn dead_records(&self) -> usize {
        self.log_records.saturating_sub(self.live_records())
    }

    fn compact(&mut self) -> SyncResult<()> {
        let mut bodies = self
            .entries
            .iter()
            .map(|entry| QueueRecord::Enqueued(entry.clone()).encode())
            .collect::<SyncResult<Vec<_>>>()?;
        if let Some(server_time) = self.last_pull {
            bodies.push(QueueRecord::Pulled { server_time }.encode()?);
        }
        self.log.rewrite(bodies.iter().map(Vec::as_slice))?;

        tracing::debug!(
            live = self.entries.len(),
            dropped = self.dead_records(),
            "compacted change queue"
        );
        self.log_records = bodies.len();
        Ok(())
    }
}

/// A persistent FIFO of [`Change`]s.
///
/// All operations are serialized behind one lock, so a queue can be shared
/// between the UI thread and the sync orchestrator.
pub struct ChangeQueue<B: StorageBackend> {
    state: Mutex<QueueState<B>>,
    config: QueueConfig,
}

impl<B: StorageBackend> ChangeQueue<B> {
    /// Opens a queue on `backend`, replaying any persisted changes.
    pub fn open(backend: B, config: QueueConfig) -> SyncResult<Self> {
        let (log, replay) = RecordLog::open(backend)?;

        let mut entries: Vec<QueueEntry> = Vec::new();
        let mut next_seq = 0u64;
        let mut last_pull = None;
        for body in &replay.records {
            match QueueRecord::decode(body)? {
                QueueRecord::Enqueued(entry) => {
                    next_seq = next_seq.max(entry.seq + 1);
                    entries.push(entry);
                }
                QueueRecord::Acked(ids) => {
                    let ids: HashSet<ChangeId> = ids.into_iter().collect();
                    entries.retain(|e| !ids.contains(&e.change.id));
                }
                QueueRecord::Failed { change_id, error } => {
                    if let Some(entry) = entries.iter_mut().find(|e| e.change.id == change_id) {
                        entry.attempts += 1;
                        entry.last_error = Some(error);
                    }
                }
                QueueRecord::Pulled { server_time } => last_pull = Some(server_time),
            }
        }

        tracing::debug!(
            pending = entries.len(),
            records = replay.records.len(),
            ?last_pull,
            "opened change queue"
        );

        Ok(Self {
            state: Mutex::new(QueueState {
                log,
                entries,
                next_seq,
                log_records: replay.records.len(),
                last_pull,
            }),
            config,
        })
    }

    /// Appends a new change and makes it durable.
    ///
    /// `data` is dropped for deletes.
    pub fn enqueue(
        &self,
        table: EntityTable,
        operation: Operation,
        local_id: LocalId,
        data: Option<ChangeData>,
        timestamp: i64,
    ) -> SyncResult<Change> {
        let change = Change::new(table, operation, local_id, data, timestamp)?;
        self.enqueue_change(change.clone())?;
        Ok(change)
    }

    /// Appends an already-built change.
    pub fn enqueue_change(&self, change: Change) -> SyncResult<u64> {
        change.validate()?;

        let mut state = self.state.lock();
        let entry = QueueEntry {
            seq: state.next_seq,
            change,
            attempts: 0,
            last_error: None,
        };
        state.append(&QueueRecord::Enqueued(entry.clone()))?;

        tracing::debug!(
            seq = entry.seq,
            change_id = %entry.change.id,
            table = %entry.change.table,
            operation = %entry.change.operation,
            "enqueued change"
        );

        let seq = entry.seq;
        state.next_seq += 1;
        state.entries.push(entry);
        Ok(seq)
    }

    /// Returns up to `max` of the oldest entries without removing them.
    pub fn next_batch(&self, max: usize) -> Vec<QueueEntry> {
        self.state.lock().entries.iter().take(max).cloned().collect()
    }

    /// Returns up to `max` of the oldest entries queued after `seq`.
    pub fn next_batch_after(&self, seq: Option<u64>, max: usize) -> Vec<QueueEntry> {
        let state = self.state.lock();
        state
            .entries
            .iter()
            .filter(|e| seq.map_or(true, |s| e.seq > s))
            .take(max)
            .cloned()
            .collect()
    }

    /// Removes acknowledged changes. Unknown ids are ignored.
    ///
    /// Returns the number of entries removed.
    pub fn ack(&self, change_ids: &[ChangeId]) -> SyncResult<usize> {
        let mut state = self.state.lock();
        let wanted: HashSet<&ChangeId> = change_ids.iter().collect();
        let known: Vec<ChangeId> = state
            .entries
            .iter()
            .filter(|e| wanted.contains(&e.change.id))
            .map(|e| e.change.id.clone())
            .collect();
        if known.is_empty() {
            return Ok(0);
        }

        state.append(&QueueRecord::Acked(known.clone()))?;
        let removed: HashSet<ChangeId> = known.into_iter().collect();
        state.entries.retain(|e| !removed.contains(&e.change.id));

        let dead = state.dead_records();
        if dead >= self.config.compact_threshold && dead > state.entries.len() {
            state.compact()?;
        }
        Ok(removed.len())
    }

    /// Records a server-side failure for a change, leaving it queued.
    ///
    /// Returns false if the change is not in the queue.
    pub fn mark_failed(&self, change_id: &ChangeId, reason: &str) -> SyncResult<bool> {
        let mut state = self.state.lock();
        if !state.entries.iter().any(|e| &e.change.id == change_id) {
            return Ok(false);
        }

        state.append(&QueueRecord::Failed {
            change_id: change_id.clone(),
            error: reason.to_string(),
        })?;
        if let Some(entry) = state.entries.iter_mut().find(|e| &e.change.id == change_id) {
            entry.attempts += 1;
            entry.last_error = Some(reason.to_string());
            tracing::warn!(
                change_id = %change_id,
                attempts = entry.attempts,
                reason,
                "change rejected by server"
            );
        }
        Ok(true)
    }

    /// Returns true if a change for this entity is still queued.
    pub fn has_pending(&self, table: EntityTable, local_id: &LocalId) -> bool {
        self.state
            .lock()
            .entries
            .iter()
            .any(|e| e.change.table == table && &e.change.local_id == local_id)
    }

    /// Durably records the server time of a completed full pull.
    pub fn record_pull(&self, server_time: i64) -> SyncResult<()> {
        let mut state = self.state.lock();
        state.append(&QueueRecord::Pulled { server_time })?;
        state.last_pull = Some(server_time);
        Ok(())
    }

    /// Returns the server time of the last completed full pull, if any.
    pub fn last_pull(&self) -> Option<i64> {
        self.state.lock().last_pull
    }

    /// Returns the number of queued changes.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Returns the number of queued changes that have failed at least once.
    pub fn failed_count(&self) -> usize {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|e| e.attempts > 0)
            .count()
    }

    /// Returns a copy of every queued entry in order.
    pub fn entries(&self) -> Vec<QueueEntry> {
        self.state.lock().entries.clone()
    }

    /// Rewrites the log with only the live entries.
    pub fn compact(&self) -> SyncResult<()> {
        self.state.lock().compact()
    }

    /// Returns the size of the underlying log in bytes.
    pub fn log_size(&self) -> SyncResult<u64> {
        Ok(self.state.lock().log.size()?)
    }

    /// Closes the queue, returning the backend.
    pub fn into_backend(self) -> B {
        self.state.into_inner().log.into_backend()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexisync_protocol::{BookData, ChapterData};
    use lexisync_storage::{FileBackend, InMemoryBackend};
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn book(name: &str) -> ChangeData {
        ChangeData::Book(BookData {
            name: name.into(),
            language: "de".into(),
            description: None,
            cover_color: None,
        })
    }

    fn enqueue_book(queue: &ChangeQueue<impl StorageBackend>, id: &str) -> Change {
        queue
            .enqueue(
                EntityTable::Books,
                Operation::Create,
                id.into(),
                Some(book(id)),
                1,
            )
            .unwrap()
    }

    fn memory_queue() -> (ChangeQueue<InMemoryBackend>, InMemoryBackend) {
        let backend = InMemoryBackend::new();
        let queue = ChangeQueue::open(backend.clone(), QueueConfig::default()).unwrap();
        (queue, backend)
    }

    #[test]
    fn fifo_order_and_peek() {
        let (queue, _) = memory_queue();
        let a = enqueue_book(&queue, "a");
        let b = enqueue_book(&queue, "b");
        let c = enqueue_book(&queue, "c");

        let batch = queue.next_batch(2);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].change.id, a.id);
        assert_eq!(batch[1].change.id, b.id);

        // Peeking does not remove.
        assert_eq!(queue.len(), 3);
        let rest = queue.next_batch_after(Some(batch[1].seq), 10);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].change.id, c.id);
    }

    #[test]
    fn ack_removes_and_ignores_unknown() {
        let (queue, _) = memory_queue();
        let a = enqueue_book(&queue, "a");
        let b = enqueue_book(&queue, "b");

        let removed = queue.ack(&[a.id.clone(), ChangeId::from("unknown")]).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next_batch(10)[0].change.id, b.id);

        assert_eq!(queue.ack(&[a.id]).unwrap(), 0);
    }

    #[test]
    fn mark_failed_keeps_entry() {
        let (queue, _) = memory_queue();
        let a = enqueue_book(&queue, "a");

        assert!(queue.mark_failed(&a.id, "Book not found").unwrap());
        assert!(queue.mark_failed(&a.id, "Book still not found").unwrap());
        assert!(!queue.mark_failed(&ChangeId::from("nope"), "x").unwrap());

        let entry = &queue.entries()[0];
        assert_eq!(entry.attempts, 2);
        assert_eq!(entry.last_error.as_deref(), Some("Book still not found"));
        assert_eq!(queue.failed_count(), 1);
    }

    #[test]
    fn delete_drops_payload() {
        let (queue, _) = memory_queue();
        let change = queue
            .enqueue(
                EntityTable::Books,
                Operation::Delete,
                "b1".into(),
                Some(book("ignored")),
                5,
            )
            .unwrap();
        assert!(change.data.is_none());
    }

    #[test]
    fn invalid_change_is_not_queued() {
        let (queue, _) = memory_queue();
        let result = queue.enqueue(EntityTable::Books, Operation::Create, "b1".into(), None, 0);
        assert!(matches!(result, Err(SyncError::InvalidChange(_))));
        assert!(queue.is_empty());
    }

    #[test]
    fn replay_restores_state() {
        let (queue, backend) = memory_queue();
        let a = enqueue_book(&queue, "a");
        let b = enqueue_book(&queue, "b");
        let c = enqueue_book(&queue, "c");
        queue.ack(&[b.id.clone()]).unwrap();
        queue.mark_failed(&c.id, "Section not found").unwrap();
        drop(queue);

        let queue = ChangeQueue::open(backend, QueueConfig::default()).unwrap();
        let entries = queue.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].change.id, a.id);
        assert_eq!(entries[1].change.id, c.id);
        assert_eq!(entries[1].attempts, 1);

        // New sequence numbers continue after the replayed ones.
        enqueue_book(&queue, "d");
        let seqs: Vec<u64> = queue.entries().iter().map(|e| e.seq).collect();
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn storage_failure_surfaces_and_leaves_queue_unchanged() {
        let (queue, backend) = memory_queue();
        enqueue_book(&queue, "a");

        backend.set_fail_writes(true);
        let result = queue.enqueue(
            EntityTable::Books,
            Operation::Create,
            "b".into(),
            Some(book("b")),
            2,
        );
        assert!(matches!(result, Err(SyncError::Storage(_))));
        backend.set_fail_writes(false);

        assert_eq!(queue.len(), 1);
        drop(queue);
        let queue = ChangeQueue::open(backend, QueueConfig::default()).unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn enqueue_after_short_write_survives_reopen() {
        let (queue, backend) = memory_queue();
        let first = enqueue_book(&queue, "a");

        backend.tear_next_append(9);
        let result = queue.enqueue(
            EntityTable::Books,
            Operation::Create,
            "torn".into(),
            Some(book("torn")),
            2,
        );
        assert!(matches!(result, Err(SyncError::Storage(_))));
        let second = enqueue_book(&queue, "b");
        drop(queue);

        let queue = ChangeQueue::open(backend, QueueConfig::default()).unwrap();
        let replayed: Vec<ChangeId> = queue.entries().into_iter().map(|e| e.change.id).collect();
        assert_eq!(replayed, vec![first.id, second.id]);
    }

    #[test]
    fn pull_watermark_survives_reopen_and_compaction() {
        let (queue, backend) = memory_queue();
        assert_eq!(queue.last_pull(), None);

        queue.record_pull(1_000).unwrap();
        queue.record_pull(2_000).unwrap();
        let keep = enqueue_book(&queue, "keep");
        let gone = enqueue_book(&queue, "gone");
        queue.ack(&[gone.id]).unwrap();
        queue.compact().unwrap();

        let (records, _) = lexisync_storage::decode_frames(&backend.data());
        assert_eq!(records.len(), 2);
        drop(queue);

        let queue = ChangeQueue::open(backend, QueueConfig::default()).unwrap();
        assert_eq!(queue.last_pull(), Some(2_000));
        assert_eq!(queue.entries()[0].change.id, keep.id);
    }

    #[test]
    fn acks_trigger_compaction() {
        let backend = InMemoryBackend::new();
        let queue = ChangeQueue::open(
            backend.clone(),
            QueueConfig::default().with_compact_threshold(4),
        )
        .unwrap();

        let keep = enqueue_book(&queue, "keep");
        for i in 0..6 {
            let c = enqueue_book(&queue, &format!("tmp{i}"));
            queue.ack(&[c.id]).unwrap();
        }

        let (records, _) = lexisync_storage::decode_frames(&backend.data());
        assert_eq!(records.len(), 1);
        assert_eq!(queue.entries()[0].change.id, keep.id);
    }

    #[test]
    fn compaction_preserves_live_entries_and_failures() {
        let backend = InMemoryBackend::new();
        let queue = ChangeQueue::open(
            backend.clone(),
            QueueConfig::default().with_compact_threshold(1000),
        )
        .unwrap();

        let keep = enqueue_book(&queue, "keep");
        queue.mark_failed(&keep.id, "Book not found").unwrap();
        for i in 0..6 {
            let c = enqueue_book(&queue, &format!("tmp{i}"));
            queue.ack(&[c.id]).unwrap();
        }

        let before = backend.data().len();
        queue.compact().unwrap();
        assert!(backend.data().len() < before);
        drop(queue);

        let queue = ChangeQueue::open(backend, QueueConfig::default()).unwrap();
        let entries = queue.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].change.id, keep.id);
        assert_eq!(entries[0].attempts, 1);
        assert_eq!(entries[0].last_error.as_deref(), Some("Book not found"));
    }

    #[test]
    fn has_pending_tracks_entity() {
        let (queue, _) = memory_queue();
        let a = enqueue_book(&queue, "a");
        queue
            .enqueue(
                EntityTable::Chapters,
                Operation::Create,
                "c1".into(),
                Some(ChangeData::Chapter(ChapterData {
                    book_id: "a".into(),
                    name: "Unit 1".into(),
                    order: 1,
                })),
                2,
            )
            .unwrap();

        assert!(queue.has_pending(EntityTable::Books, &"a".into()));
        assert!(queue.has_pending(EntityTable::Chapters, &"c1".into()));
        assert!(!queue.has_pending(EntityTable::Chapters, &"a".into()));

        queue.ack(&[a.id]).unwrap();
        assert!(!queue.has_pending(EntityTable::Books, &"a".into()));
    }

    #[test]
    fn file_queue_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("device").join("queue.log");

        let ids: Vec<ChangeId> = {
            let backend = FileBackend::open_with_create_dirs(&path).unwrap();
            let queue = ChangeQueue::open(backend, QueueConfig::default()).unwrap();
            (0..3)
                .map(|i| enqueue_book(&queue, &format!("b{i}")).id)
                .collect()
        };

        let backend = FileBackend::open(&path).unwrap();
        let queue = ChangeQueue::open(backend, QueueConfig::default()).unwrap();
        let replayed: Vec<ChangeId> = queue.entries().into_iter().map(|e| e.change.id).collect();
        assert_eq!(replayed, ids);
    }

    proptest! {
        #[test]
        fn order_survives_reopen(
            count in 1usize..20,
            acked in proptest::collection::vec(any::<bool>(), 20)
        ) {
            let (queue, backend) = memory_queue();
            let mut expected = Vec::new();
            for i in 0..count {
                let change = enqueue_book(&queue, &format!("b{i}"));
                if acked[i] {
                    queue.ack(&[change.id]).unwrap();
                } else {
                    expected.push(change.id);
                }
            }
            drop(queue);

            let queue = ChangeQueue::open(backend, QueueConfig::default()).unwrap();
            let replayed: Vec<ChangeId> =
                queue.entries().into_iter().map(|e| e.change.id).collect();
            prop_assert_eq!(replayed, expected);
        }
    }
}
