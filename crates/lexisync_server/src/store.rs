//! Authoritative server-side storage.
//!
//! Rows are scoped by user. Each row carries a server-assigned [`ServerId`]
//! (a per-table counter) alongside the client's local id; foreign keys
//! between rows use server ids. `(user, table, local_id)` is unique.

use crate::auth::UserId;
use crate::error::{ServerError, ServerResult};
use lexisync_protocol::{BookData, EntityTable, FixedDecimal, LocalId};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Server-assigned row identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerId(pub i64);

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mutable fields of a row, with parent references resolved to server ids.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerRecord {
    /// A book.
    Book(BookData),
    /// A chapter.
    Chapter {
        /// Owning book.
        book_id: ServerId,
        /// Display name.
        name: String,
        /// Position within the book.
        order: i32,
    },
    /// A section.
    Section {
        /// Owning book.
        book_id: ServerId,
        /// Owning chapter.
        chapter_id: ServerId,
        /// Display name.
        name: String,
        /// Position within the chapter.
        order: i32,
        /// Whether the lesson has been covered in class.
        covered_in_class: bool,
    },
    /// A vocabulary item.
    VocabularyItem {
        /// Owning book.
        book_id: ServerId,
        /// Owning chapter, if sorted.
        chapter_id: Option<ServerId>,
        /// Owning section, if sorted.
        section_id: Option<ServerId>,
        /// Text in the source language.
        source_text: String,
        /// Text in the target language.
        target_text: String,
        /// Learner notes.
        notes: Option<String>,
        /// Attached image reference.
        image_ref: Option<String>,
    },
    /// A learning progress record.
    LearningProgress {
        /// Reviewed vocabulary item.
        vocabulary_item_id: ServerId,
        /// Ease factor as `DECIMAL(4,2)`.
        ease_factor: FixedDecimal,
        /// Days until the next review.
        interval_days: u32,
        /// Consecutive successful repetitions.
        repetitions: u32,
        /// Next scheduled review (epoch millis).
        next_review_at: Option<i64>,
        /// Last review (epoch millis).
        last_review_at: Option<i64>,
        /// Total number of reviews.
        total_reviews: u32,
        /// Number of correct reviews.
        correct_reviews: u32,
    },
}

impl ServerRecord {
    /// Returns the table this record belongs to.
    pub fn table(&self) -> EntityTable {
        match self {
            ServerRecord::Book(_) => EntityTable::Books,
            ServerRecord::Chapter { .. } => EntityTable::Chapters,
            ServerRecord::Section { .. } => EntityTable::Sections,
            ServerRecord::VocabularyItem { .. } => EntityTable::VocabularyItems,
            ServerRecord::LearningProgress { .. } => EntityTable::LearningProgress,
        }
    }
}

/// A stored row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    /// Server id.
    pub server_id: ServerId,
    /// Client-generated id.
    pub local_id: LocalId,
    /// Row contents.
    pub record: ServerRecord,
    /// Insert time (epoch millis).
    pub created_at: i64,
    /// Last write time (epoch millis).
    pub updated_at: i64,
    /// Tombstone time, if soft-deleted.
    pub deleted_at: Option<i64>,
}

impl StoredRow {
    /// Returns true if the row is not tombstoned.
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Per-user state outside the entity tables.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserState {
    /// Gamification blob.
    pub gamification: Option<Value>,
    /// Achievements blob.
    pub achievements: Option<Value>,
    /// Settings blob.
    pub settings: Option<Value>,
    /// Last accepted push (epoch millis).
    pub last_synced_at: Option<i64>,
}

/// Storage seam for the reconciler and snapshot provider.
///
/// Implementations must make each call atomic; the reconciler never needs
/// more than one call to be atomic together.
pub trait ServerStore: Send + Sync {
    /// Finds a row by local id, live or tombstoned.
    fn find(
        &self,
        user: &UserId,
        table: EntityTable,
        local_id: &LocalId,
    ) -> ServerResult<Option<StoredRow>>;

    /// Finds a row by server id, live or tombstoned.
    fn get_by_id(
        &self,
        user: &UserId,
        table: EntityTable,
        id: ServerId,
    ) -> ServerResult<Option<StoredRow>>;

    /// Writes a live row under `local_id` and returns its server id.
    ///
    /// An existing row with the same local id, live or tombstoned, is
    /// overwritten in place and keeps its server id. A new row gets the
    /// next id. Lookup and write happen as one atomic step.
    fn upsert(
        &self,
        user: &UserId,
        local_id: LocalId,
        record: ServerRecord,
        now: i64,
    ) -> ServerResult<ServerId>;

    /// Marks a row deleted.
    fn tombstone(&self, user: &UserId, table: EntityTable, id: ServerId, now: i64)
        -> ServerResult<()>;

    /// Deletes a row outright.
    fn remove(&self, user: &UserId, table: EntityTable, id: ServerId) -> ServerResult<()>;

    /// Returns live rows of a table in server id order.
    fn live_rows(&self, user: &UserId, table: EntityTable) -> ServerResult<Vec<StoredRow>>;

    /// Returns the live progress row for a vocabulary item, if any.
    fn live_progress_for_item(
        &self,
        user: &UserId,
        vocabulary_item_id: ServerId,
    ) -> ServerResult<Option<StoredRow>>;

    /// Returns the user's auxiliary state.
    fn user_state(&self, user: &UserId) -> ServerResult<UserState>;

    /// Replaces the user's auxiliary state.
    fn put_user_state(&self, user: &UserId, state: UserState) -> ServerResult<()>;

    /// Records a push for the user.
    fn set_last_synced(&self, user: &UserId, now: i64) -> ServerResult<()>;
}

#[derive(Default)]
struct UserData {
    rows: HashMap<EntityTable, BTreeMap<ServerId, StoredRow>>,
    by_local: HashMap<(EntityTable, LocalId), ServerId>,
    state: UserState,
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<UserId, UserData>,
    next_ids: HashMap<EntityTable, i64>,
}

/// In-memory [`ServerStore`].
#[derive(Default)]
pub struct MemoryServerStore {
    state: RwLock<MemoryState>,
}

impl MemoryServerStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of rows (live and tombstoned) in a table.
    pub fn row_count(&self, user: &UserId, table: EntityTable) -> usize {
        self.state
            .read()
            .users
            .get(user)
            .and_then(|data| data.rows.get(&table))
            .map_or(0, BTreeMap::len)
    }
}

fn missing(table: EntityTable, id: ServerId) -> ServerError {
    ServerError::Storage(format!("no {table} row with id {id}"))
}

impl ServerStore for MemoryServerStore {
    fn find(
        &self,
        user: &UserId,
        table: EntityTable,
        local_id: &LocalId,
    ) -> ServerResult<Option<StoredRow>> {
        let state = self.state.read();
        let Some(data) = state.users.get(user) else {
            return Ok(None);
        };
        Ok(data
            .by_local
            .get(&(table, local_id.clone()))
            .and_then(|id| data.rows.get(&table)?.get(id))
            .cloned())
    }

    fn get_by_id(
        &self,
        user: &UserId,
        table: EntityTable,
        id: ServerId,
    ) -> ServerResult<Option<StoredRow>> {
        let state = self.state.read();
        Ok(state
            .users
            .get(user)
            .and_then(|data| data.rows.get(&table)?.get(&id))
            .cloned())
    }

    fn upsert(
        &self,
        user: &UserId,
        local_id: LocalId,
        record: ServerRecord,
        now: i64,
    ) -> ServerResult<ServerId> {
        let table = record.table();
        let mut state = self.state.write();
        let state = &mut *state;

        let data = state.users.entry(user.clone()).or_default();
        let key = (table, local_id);
        let rows = data.rows.entry(table).or_default();

        if let Some(&id) = data.by_local.get(&key) {
            let row = rows.get_mut(&id).ok_or_else(|| missing(table, id))?;
            row.record = record;
            row.updated_at = now;
            row.deleted_at = None;
            return Ok(id);
        }

        let next = state.next_ids.entry(table).or_insert(1);
        let id = ServerId(*next);
        *next += 1;

        rows.insert(
            id,
            StoredRow {
                server_id: id,
                local_id: key.1.clone(),
                record,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            },
        );
        data.by_local.insert(key, id);
        Ok(id)
    }

    fn tombstone(
        &self,
        user: &UserId,
        table: EntityTable,
        id: ServerId,
        now: i64,
    ) -> ServerResult<()> {
        let mut state = self.state.write();
        let row = state
            .users
            .get_mut(user)
            .and_then(|data| data.rows.get_mut(&table)?.get_mut(&id))
            .ok_or_else(|| missing(table, id))?;
        row.deleted_at = Some(now);
        row.updated_at = now;
        Ok(())
    }

    fn remove(&self, user: &UserId, table: EntityTable, id: ServerId) -> ServerResult<()> {
        let mut state = self.state.write();
        let data = state
            .users
            .get_mut(user)
            .ok_or_else(|| missing(table, id))?;
        let row = data
            .rows
            .get_mut(&table)
            .and_then(|rows| rows.remove(&id))
            .ok_or_else(|| missing(table, id))?;
        data.by_local.remove(&(table, row.local_id));
        Ok(())
    }

    fn live_rows(&self, user: &UserId, table: EntityTable) -> ServerResult<Vec<StoredRow>> {
        let state = self.state.read();
        Ok(state
            .users
            .get(user)
            .and_then(|data| data.rows.get(&table))
            .map(|rows| rows.values().filter(|r| r.is_live()).cloned().collect())
            .unwrap_or_default())
    }

    fn live_progress_for_item(
        &self,
        user: &UserId,
        vocabulary_item_id: ServerId,
    ) -> ServerResult<Option<StoredRow>> {
        let state = self.state.read();
        let Some(rows) = state
            .users
            .get(user)
            .and_then(|data| data.rows.get(&EntityTable::LearningProgress))
        else {
            return Ok(None);
        };
        Ok(rows
            .values()
            .find(|row| {
                row.is_live()
                    && matches!(
                        row.record,
                        ServerRecord::LearningProgress { vocabulary_item_id: item, .. }
                            if item == vocabulary_item_id
                    )
            })
            .cloned())
    }

    fn user_state(&self, user: &UserId) -> ServerResult<UserState> {
        Ok(self
            .state
            .read()
            .users
            .get(user)
            .map(|data| data.state.clone())
            .unwrap_or_default())
    }

    fn put_user_state(&self, user: &UserId, new_state: UserState) -> ServerResult<()> {
        self.state
            .write()
            .users
            .entry(user.clone())
            .or_default()
            .state = new_state;
        Ok(())
    }

    fn set_last_synced(&self, user: &UserId, now: i64) -> ServerResult<()> {
        self.state
            .write()
            .users
            .entry(user.clone())
            .or_default()
            .state
            .last_synced_at = Some(now);
        Ok(())
    }
}
