//! Push reconciliation.
//!
//! Applies a user's pushed changes to the authoritative store one at a time,
//! in submitted order. A change that cannot be applied is reported in the
//! response and the rest of the batch continues, including when the store
//! fails on that change.
//!
//! Writes are last-write-wins by arrival: whatever arrives last overwrites
//! the row, regardless of the change's client timestamp.

use crate::auth::UserId;
use crate::error::{ServerError, ServerResult};
use crate::store::{ServerId, ServerRecord, ServerStore, StoredRow};
use lexisync_protocol::{
    Change, ChangeData, ChangeError, EntityTable, FixedDecimal, LocalId, Operation, Placement,
    ProtocolError, PushResponse,
};
use std::sync::Arc;
use thiserror::Error;

/// The authenticated caller of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    /// Authenticated user.
    pub user_id: UserId,
    /// Server clock for this request (epoch millis).
    pub now: i64,
}

impl UserContext {
    /// Creates a context at the given time.
    pub fn new(user_id: UserId, now: i64) -> Self {
        Self { user_id, now }
    }
}

/// Why a single change was not applied.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReconcileError {
    /// A referenced parent does not exist or is deleted.
    #[error("referenced {table} {local_id} does not exist")]
    MissingParent {
        /// Parent table.
        table: EntityTable,
        /// Parent local id.
        local_id: LocalId,
    },

    /// Exactly one of chapter and section is set on a vocabulary item.
    #[error("chapterId and sectionId must both be set or both be null")]
    PlacementMismatch,

    /// The vocabulary item already has progress under another local id.
    #[error("vocabulary item {vocabulary_item} already has progress {existing}")]
    AmbiguousMapping {
        /// Vocabulary item local id.
        vocabulary_item: LocalId,
        /// Local id of the existing progress row.
        existing: LocalId,
    },

    /// A payload value cannot be stored.
    #[error(transparent)]
    InvalidValue(#[from] ProtocolError),

    /// The store failed.
    #[error(transparent)]
    Store(#[from] ServerError),
}

/// Result type for a single change.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Applies pushed changes to a [`ServerStore`].
pub struct Reconciler<S: ServerStore> {
    store: Arc<S>,
}

impl<S: ServerStore> Clone for Reconciler<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: ServerStore> Reconciler<S> {
    /// Creates a reconciler over a shared store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Returns the store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Applies `changes` in order.
    ///
    /// The user's `lastSyncedAt` is updated even when every change fails.
    ///
    /// # Errors
    ///
    /// Returns an error only if recording `lastSyncedAt` fails; every change
    /// has been attempted by then.
    pub fn apply(&self, ctx: &UserContext, changes: &[Change]) -> ServerResult<PushResponse> {
        let mut processed = 0;
        let mut errors = Vec::new();

        for change in changes {
            match self.apply_one(ctx, change) {
                Ok(()) => processed += 1,
                Err(ReconcileError::Store(e)) => {
                    tracing::error!(
                        user = %ctx.user_id,
                        change_id = %change.id,
                        error = %e,
                        "store failed during push"
                    );
                    errors.push(ChangeError::new(change.id.clone(), e.public_message()));
                }
                Err(e) => {
                    tracing::debug!(
                        user = %ctx.user_id,
                        change_id = %change.id,
                        table = %change.table,
                        error = %e,
                        "change rejected"
                    );
                    errors.push(ChangeError::new(change.id.clone(), e.to_string()));
                }
            }
        }

        self.store.set_last_synced(&ctx.user_id, ctx.now)?;

        tracing::info!(
            user = %ctx.user_id,
            processed,
            failed = errors.len(),
            "push applied"
        );
        Ok(PushResponse::processed(processed, errors))
    }

    /// Applies a single change.
    pub fn apply_one(&self, ctx: &UserContext, change: &Change) -> ReconcileResult<()> {
        change.validate()?;

        match (change.operation, &change.data) {
            (Operation::Delete, _) => {
                let existing = self
                    .store
                    .find(&ctx.user_id, change.table, &change.local_id)?;
                self.delete(ctx, change.table, existing)
            }
            (_, Some(data)) => {
                let record = self.resolve(ctx, data)?;
                if let (
                    ServerRecord::LearningProgress {
                        vocabulary_item_id, ..
                    },
                    ChangeData::LearningProgress(p),
                ) = (&record, data)
                {
                    self.check_single_progress(
                        ctx,
                        &change.local_id,
                        &p.vocabulary_item_id,
                        *vocabulary_item_id,
                    )?;
                }
                self.store
                    .upsert(&ctx.user_id, change.local_id.clone(), record, ctx.now)?;
                Ok(())
            }
            (operation, None) => Err(ProtocolError::MissingPayload {
                table: change.table,
                operation: operation.as_str(),
            }
            .into()),
        }
    }

    fn delete(
        &self,
        ctx: &UserContext,
        table: EntityTable,
        existing: Option<StoredRow>,
    ) -> ReconcileResult<()> {
        let Some(row) = existing else {
            return Ok(());
        };
        if table.has_tombstone() {
            if row.is_live() {
                self.store
                    .tombstone(&ctx.user_id, table, row.server_id, ctx.now)?;
            }
        } else {
            self.store.remove(&ctx.user_id, table, row.server_id)?;
        }
        Ok(())
    }

    fn check_single_progress(
        &self,
        ctx: &UserContext,
        local_id: &LocalId,
        vocabulary_item: &LocalId,
        vocabulary_item_id: ServerId,
    ) -> ReconcileResult<()> {
        let Some(other) = self
            .store
            .live_progress_for_item(&ctx.user_id, vocabulary_item_id)?
        else {
            return Ok(());
        };
        if other.local_id == *local_id {
            return Ok(());
        }
        Err(ReconcileError::AmbiguousMapping {
            vocabulary_item: vocabulary_item.clone(),
            existing: other.local_id,
        })
    }

    fn resolve(&self, ctx: &UserContext, data: &ChangeData) -> ReconcileResult<ServerRecord> {
        let record = match data {
            ChangeData::Book(b) => ServerRecord::Book(b.clone()),
            ChangeData::Chapter(c) => ServerRecord::Chapter {
                book_id: self.parent(ctx, EntityTable::Books, &c.book_id)?,
                name: c.name.clone(),
                order: c.order,
            },
            ChangeData::Section(s) => ServerRecord::Section {
                book_id: self.parent(ctx, EntityTable::Books, &s.book_id)?,
                chapter_id: self.parent(ctx, EntityTable::Chapters, &s.chapter_id)?,
                name: s.name.clone(),
                order: s.order,
                covered_in_class: s.covered_in_class,
            },
            ChangeData::VocabularyItem(v) => {
                let book_id = self.parent(ctx, EntityTable::Books, &v.book_id)?;
                let (chapter_id, section_id) = match v.placement() {
                    Placement::Unsorted => (None, None),
                    Placement::Sorted {
                        chapter_id,
                        section_id,
                    } => (
                        Some(self.parent(ctx, EntityTable::Chapters, chapter_id)?),
                        Some(self.parent(ctx, EntityTable::Sections, section_id)?),
                    ),
                    Placement::Incomplete => return Err(ReconcileError::PlacementMismatch),
                };
                ServerRecord::VocabularyItem {
                    book_id,
                    chapter_id,
                    section_id,
                    source_text: v.source_text.clone(),
                    target_text: v.target_text.clone(),
                    notes: v.notes.clone(),
                    image_ref: v.image_ref.clone(),
                }
            }
            ChangeData::LearningProgress(p) => ServerRecord::LearningProgress {
                vocabulary_item_id: self.parent(
                    ctx,
                    EntityTable::VocabularyItems,
                    &p.vocabulary_item_id,
                )?,
                ease_factor: FixedDecimal::ease_factor(p.ease_factor)?,
                interval_days: p.interval_days,
                repetitions: p.repetitions,
                next_review_at: p.next_review_at,
                last_review_at: p.last_review_at,
                total_reviews: p.total_reviews,
                correct_reviews: p.correct_reviews,
            },
        };
        Ok(record)
    }

    /// Resolves a parent reference to a live row's server id.
    fn parent(
        &self,
        ctx: &UserContext,
        table: EntityTable,
        local_id: &LocalId,
    ) -> ReconcileResult<ServerId> {
        match self.store.find(&ctx.user_id, table, local_id)? {
            Some(row) if row.is_live() => Ok(row.server_id),
            _ => Err(ReconcileError::MissingParent {
                table,
                local_id: local_id.clone(),
            }),
        }
    }
}
