//! Full snapshots for pull.
//!
//! A snapshot holds every live row of a user with parent references
//! translated back to local ids. It is read-only and observes whatever state
//! the store holds at read time.

use crate::error::{ServerError, ServerResult};
use crate::reconciler::UserContext;
use crate::store::{ServerId, ServerRecord, ServerStore, StoredRow};
use lexisync_protocol::{
    Book, Chapter, EntityTable, LearningProgress, LocalId, PullResponse, Section, VocabularyItem,
};
use serde_json::Value;
use std::sync::Arc;

/// Builds [`PullResponse`]s from a [`ServerStore`].
pub struct SnapshotProvider<S: ServerStore> {
    store: Arc<S>,
}

impl<S: ServerStore> SnapshotProvider<S> {
    /// Creates a provider over a shared store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Returns the user's full snapshot.
    pub fn snapshot(&self, ctx: &UserContext) -> ServerResult<PullResponse> {
        let mut response = PullResponse {
            server_time: ctx.now,
            ..PullResponse::default()
        };

        for table in EntityTable::ALL {
            for row in self.store.live_rows(&ctx.user_id, table)? {
                self.push_row(ctx, &mut response, row)?;
            }
        }

        let state = self.store.user_state(&ctx.user_id)?;
        response.gamification = state.gamification.unwrap_or(Value::Null);
        response.achievements = state.achievements.unwrap_or(Value::Null);
        response.settings = state.settings.unwrap_or(Value::Null);

        tracing::debug!(
            user = %ctx.user_id,
            entities = response.entity_count(),
            "snapshot built"
        );
        Ok(response)
    }

    fn push_row(
        &self,
        ctx: &UserContext,
        response: &mut PullResponse,
        row: StoredRow,
    ) -> ServerResult<()> {
        let local_id = row.local_id;
        match row.record {
            ServerRecord::Book(b) => response.books.push(Book {
                local_id,
                name: b.name,
                language: b.language,
                description: b.description,
                cover_color: b.cover_color,
            }),
            ServerRecord::Chapter {
                book_id,
                name,
                order,
            } => response.chapters.push(Chapter {
                local_id,
                local_book_id: self.local_id_of(ctx, EntityTable::Books, book_id)?,
                name,
                order,
            }),
            ServerRecord::Section {
                book_id,
                chapter_id,
                name,
                order,
                covered_in_class,
            } => response.sections.push(Section {
                local_id,
                local_book_id: self.local_id_of(ctx, EntityTable::Books, book_id)?,
                local_chapter_id: self.local_id_of(ctx, EntityTable::Chapters, chapter_id)?,
                name,
                order,
                covered_in_class,
            }),
            ServerRecord::VocabularyItem {
                book_id,
                chapter_id,
                section_id,
                source_text,
                target_text,
                notes,
                image_ref,
            } => response.vocabulary_items.push(VocabularyItem {
                local_id,
                local_book_id: self.local_id_of(ctx, EntityTable::Books, book_id)?,
                local_chapter_id: chapter_id
                    .map(|id| self.local_id_of(ctx, EntityTable::Chapters, id))
                    .transpose()?,
                local_section_id: section_id
                    .map(|id| self.local_id_of(ctx, EntityTable::Sections, id))
                    .transpose()?,
                source_text,
                target_text,
                notes,
                image_ref,
            }),
            ServerRecord::LearningProgress {
                vocabulary_item_id,
                ease_factor,
                interval_days,
                repetitions,
                next_review_at,
                last_review_at,
                total_reviews,
                correct_reviews,
            } => response.learning_progress.push(LearningProgress {
                local_id,
                local_vocabulary_item_id: self.local_id_of(
                    ctx,
                    EntityTable::VocabularyItems,
                    vocabulary_item_id,
                )?,
                ease_factor: ease_factor.to_f64(),
                interval_days,
                repetitions,
                next_review_at,
                last_review_at,
                total_reviews,
                correct_reviews,
            }),
        }
        Ok(())
    }

    /// Maps a parent's server id back to its local id.
    ///
    /// Tombstoned parents still resolve; a child can outlive its parent's
    /// deletion.
    fn local_id_of(
        &self,
        ctx: &UserContext,
        table: EntityTable,
        id: ServerId,
    ) -> ServerResult<LocalId> {
        self.store
            .get_by_id(&ctx.user_id, table, id)?
            .map(|row| row.local_id)
            .ok_or_else(|| ServerError::Internal(format!("dangling {table} reference {id}")))
    }
}
