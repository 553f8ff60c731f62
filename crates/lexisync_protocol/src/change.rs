//! Queued mutations and their payloads.
//!
//! A [`Change`] records one create, update or delete of one entity. The
//! payload is a tagged union keyed by [`EntityTable`]: the table named on the
//! change decides which schema `data` is parsed against, so a mismatched
//! payload is rejected when the change is decoded rather than deep inside
//! reconciliation.
//!
//! Payload parent references are named after the parent (`bookId`,
//! `chapterId`, ...) and carry the parent's *local* identifier. The
//! `local`-prefixed spellings are accepted as aliases.

use crate::entity::{
    Book, Chapter, Entity, EntityTable, LearningProgress, LocalId, Section, VocabularyItem,
    MIN_EASE_FACTOR,
};
use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Unique identifier of a queued change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeId(String);

impl ChangeId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChangeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ChangeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Kind of mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Insert a new entity.
    Create,
    /// Modify an existing entity.
    Update,
    /// Remove an entity.
    Delete,
}

impl Operation {
    /// Returns the wire name of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    /// Returns true if the operation carries a payload.
    pub fn needs_payload(&self) -> bool {
        !matches!(self, Operation::Delete)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a book change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookData {
    /// Display name.
    pub name: String,
    /// Language being learned.
    pub language: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Cover color.
    #[serde(default)]
    pub cover_color: Option<String>,
}

/// Payload of a chapter change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterData {
    /// Owning book (local id).
    #[serde(alias = "localBookId")]
    pub book_id: LocalId,
    /// Display name.
    pub name: String,
    /// Position within the book.
    pub order: i32,
}

/// Payload of a section change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionData {
    /// Owning book (local id).
    #[serde(alias = "localBookId")]
    pub book_id: LocalId,
    /// Owning chapter (local id).
    #[serde(alias = "localChapterId")]
    pub chapter_id: LocalId,
    /// Display name.
    pub name: String,
    /// Position within the chapter.
    pub order: i32,
    /// Whether the lesson has been covered in class.
    #[serde(default)]
    pub covered_in_class: bool,
}

/// Payload of a vocabulary item change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VocabularyItemData {
    /// Owning book (local id).
    #[serde(alias = "localBookId")]
    pub book_id: LocalId,
    /// Owning chapter (local id), if sorted.
    #[serde(default, alias = "localChapterId")]
    pub chapter_id: Option<LocalId>,
    /// Owning section (local id), if sorted.
    #[serde(default, alias = "localSectionId")]
    pub section_id: Option<LocalId>,
    /// Text in the source language.
    pub source_text: String,
    /// Text in the target language.
    pub target_text: String,
    /// Learner notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// Reference to an attached image.
    #[serde(default)]
    pub image_ref: Option<String>,
}

/// Where a vocabulary item sits in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement<'a> {
    /// Directly under the book.
    Unsorted,
    /// Inside a chapter and section.
    Sorted {
        /// Chapter local id.
        chapter_id: &'a LocalId,
        /// Section local id.
        section_id: &'a LocalId,
    },
    /// Exactly one of chapter and section is set.
    Incomplete,
}

impl VocabularyItemData {
    /// Classifies the chapter/section pair.
    pub fn placement(&self) -> Placement<'_> {
        match (&self.chapter_id, &self.section_id) {
            (None, None) => Placement::Unsorted,
            (Some(chapter_id), Some(section_id)) => Placement::Sorted {
                chapter_id,
                section_id,
            },
            _ => Placement::Incomplete,
        }
    }
}

/// Payload of a learning progress change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningProgressData {
    /// Reviewed vocabulary item (local id).
    #[serde(alias = "localVocabularyItemId")]
    pub vocabulary_item_id: LocalId,
    /// Ease factor.
    pub ease_factor: f64,
    /// Days until the next review.
    #[serde(rename = "interval")]
    pub interval_days: u32,
    /// Consecutive successful repetitions.
    pub repetitions: u32,
    /// Next scheduled review (epoch millis).
    #[serde(default)]
    pub next_review_at: Option<i64>,
    /// Last review (epoch millis).
    #[serde(default)]
    pub last_review_at: Option<i64>,
    /// Total number of reviews.
    #[serde(default)]
    pub total_reviews: u32,
    /// Number of correct reviews.
    #[serde(default)]
    pub correct_reviews: u32,
}

/// Table-specific change payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChangeData {
    /// Book payload.
    Book(BookData),
    /// Chapter payload.
    Chapter(ChapterData),
    /// Section payload.
    Section(SectionData),
    /// Vocabulary item payload.
    VocabularyItem(VocabularyItemData),
    /// Learning progress payload.
    LearningProgress(LearningProgressData),
}

impl ChangeData {
    /// Returns the table this payload belongs to.
    pub fn table(&self) -> EntityTable {
        match self {
            ChangeData::Book(_) => EntityTable::Books,
            ChangeData::Chapter(_) => EntityTable::Chapters,
            ChangeData::Section(_) => EntityTable::Sections,
            ChangeData::VocabularyItem(_) => EntityTable::VocabularyItems,
            ChangeData::LearningProgress(_) => EntityTable::LearningProgress,
        }
    }

    /// Parses a JSON payload against the schema of `table` and validates it.
    pub fn parse(table: EntityTable, value: serde_json::Value) -> ProtocolResult<Self> {
        fn decode<T: serde::de::DeserializeOwned>(
            table: EntityTable,
            value: serde_json::Value,
        ) -> ProtocolResult<T> {
            serde_json::from_value(value)
                .map_err(|e| ProtocolError::invalid_payload(table, e.to_string()))
        }

        let data = match table {
            EntityTable::Books => ChangeData::Book(decode(table, value)?),
            EntityTable::Chapters => ChangeData::Chapter(decode(table, value)?),
            EntityTable::Sections => ChangeData::Section(decode(table, value)?),
            EntityTable::VocabularyItems => ChangeData::VocabularyItem(decode(table, value)?),
            EntityTable::LearningProgress => ChangeData::LearningProgress(decode(table, value)?),
        };
        data.validate()?;
        Ok(data)
    }

    /// Checks field-level rules that serde cannot express.
    ///
    /// Referential rules (parents exist, chapter/section co-presence) are
    /// left to the receiver, which reports them per change.
    pub fn validate(&self) -> ProtocolResult<()> {
        match self {
            ChangeData::Book(b) => {
                require_text(self.table(), "name", &b.name)?;
                require_text(self.table(), "language", &b.language)
            }
            ChangeData::Chapter(c) => {
                require_id("bookId", &c.book_id)?;
                require_text(self.table(), "name", &c.name)
            }
            ChangeData::Section(s) => {
                require_id("bookId", &s.book_id)?;
                require_id("chapterId", &s.chapter_id)?;
                require_text(self.table(), "name", &s.name)
            }
            ChangeData::VocabularyItem(v) => {
                require_id("bookId", &v.book_id)?;
                if let Some(id) = &v.chapter_id {
                    require_id("chapterId", id)?;
                }
                if let Some(id) = &v.section_id {
                    require_id("sectionId", id)?;
                }
                require_text(self.table(), "sourceText", &v.source_text)?;
                require_text(self.table(), "targetText", &v.target_text)
            }
            ChangeData::LearningProgress(p) => {
                require_id("vocabularyItemId", &p.vocabulary_item_id)?;
                if !p.ease_factor.is_finite() || p.ease_factor < MIN_EASE_FACTOR {
                    return Err(ProtocolError::out_of_range(
                        "easeFactor",
                        format!("{} is below {MIN_EASE_FACTOR}", p.ease_factor),
                    ));
                }
                if p.correct_reviews > p.total_reviews {
                    return Err(ProtocolError::out_of_range(
                        "correctReviews",
                        format!(
                            "{} correct out of {} total",
                            p.correct_reviews, p.total_reviews
                        ),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Builds the local-id shaped entity this payload describes.
    pub fn into_entity(self, local_id: LocalId) -> Entity {
        match self {
            ChangeData::Book(b) => Entity::Book(Book {
                local_id,
                name: b.name,
                language: b.language,
                description: b.description,
                cover_color: b.cover_color,
            }),
            ChangeData::Chapter(c) => Entity::Chapter(Chapter {
                local_id,
                local_book_id: c.book_id,
                name: c.name,
                order: c.order,
            }),
            ChangeData::Section(s) => Entity::Section(Section {
                local_id,
                local_book_id: s.book_id,
                local_chapter_id: s.chapter_id,
                name: s.name,
                order: s.order,
                covered_in_class: s.covered_in_class,
            }),
            ChangeData::VocabularyItem(v) => Entity::VocabularyItem(VocabularyItem {
                local_id,
                local_book_id: v.book_id,
                local_chapter_id: v.chapter_id,
                local_section_id: v.section_id,
                source_text: v.source_text,
                target_text: v.target_text,
                notes: v.notes,
                image_ref: v.image_ref,
            }),
            ChangeData::LearningProgress(p) => Entity::LearningProgress(LearningProgress {
                local_id,
                local_vocabulary_item_id: p.vocabulary_item_id,
                ease_factor: p.ease_factor,
                interval_days: p.interval_days,
                repetitions: p.repetitions,
                next_review_at: p.next_review_at,
                last_review_at: p.last_review_at,
                total_reviews: p.total_reviews,
                correct_reviews: p.correct_reviews,
            }),
        }
    }
}

fn require_text(table: EntityTable, field: &str, value: &str) -> ProtocolResult<()> {
    if value.trim().is_empty() {
        return Err(ProtocolError::invalid_payload(
            table,
            format!("`{field}` must not be empty"),
        ));
    }
    Ok(())
}

fn require_id(field: &'static str, id: &LocalId) -> ProtocolResult<()> {
    if id.is_blank() {
        return Err(ProtocolError::EmptyIdentifier { field });
    }
    Ok(())
}

/// One pending mutation of one entity.
///
/// Serializes to the push wire shape:
///
/// ```json
/// {"id": "...", "table": "chapters", "operation": "create",
///  "localId": "...", "data": {"bookId": "...", "name": "...", "order": 1},
///  "timestamp": 1700000000000}
/// ```
///
/// Deserialization validates the payload against `table`; a delete's `data`
/// is ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "WireChange")]
pub struct Change {
    /// Unique change identifier.
    pub id: ChangeId,
    /// Target table.
    pub table: EntityTable,
    /// Mutation kind.
    pub operation: Operation,
    /// Local id of the mutated entity.
    pub local_id: LocalId,
    /// Payload; present for create and update, absent for delete.
    pub data: Option<ChangeData>,
    /// When the mutation happened on the client (epoch millis).
    pub timestamp: i64,
}

impl Change {
    /// Builds a change with a fresh id, checking payload consistency.
    pub fn new(
        table: EntityTable,
        operation: Operation,
        local_id: LocalId,
        data: Option<ChangeData>,
        timestamp: i64,
    ) -> ProtocolResult<Self> {
        let change = Self {
            id: ChangeId::generate(),
            table,
            operation,
            local_id,
            data: if operation.needs_payload() { data } else { None },
            timestamp,
        };
        change.validate()?;
        Ok(change)
    }

    /// Builds a create change from an entity.
    pub fn create(entity: &Entity, timestamp: i64) -> ProtocolResult<Self> {
        Self::new(
            entity.table(),
            Operation::Create,
            entity.local_id().clone(),
            Some(entity.to_change_data()),
            timestamp,
        )
    }

    /// Builds an update change from an entity.
    pub fn update(entity: &Entity, timestamp: i64) -> ProtocolResult<Self> {
        Self::new(
            entity.table(),
            Operation::Update,
            entity.local_id().clone(),
            Some(entity.to_change_data()),
            timestamp,
        )
    }

    /// Builds a delete change.
    pub fn delete(table: EntityTable, local_id: LocalId, timestamp: i64) -> ProtocolResult<Self> {
        Self::new(table, Operation::Delete, local_id, None, timestamp)
    }

    /// Checks identifiers, payload presence and payload table.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.id.as_str().trim().is_empty() {
            return Err(ProtocolError::EmptyIdentifier { field: "id" });
        }
        require_id("localId", &self.local_id)?;

        match (&self.data, self.operation.needs_payload()) {
            (None, true) => Err(ProtocolError::MissingPayload {
                table: self.table,
                operation: self.operation.as_str(),
            }),
            (Some(data), true) => {
                if data.table() != self.table {
                    return Err(ProtocolError::invalid_payload(
                        self.table,
                        format!("payload belongs to {}", data.table()),
                    ));
                }
                data.validate()
            }
            (_, false) => Ok(()),
        }
    }

    /// Returns the entity this change writes, if it is not a delete.
    pub fn to_entity(&self) -> Option<Entity> {
        self.data
            .clone()
            .map(|data| data.into_entity(self.local_id.clone()))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireChange {
    id: ChangeId,
    table: EntityTable,
    operation: Operation,
    local_id: LocalId,
    #[serde(default)]
    data: Option<serde_json::Value>,
    timestamp: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireChangeRef<'a> {
    id: &'a ChangeId,
    table: EntityTable,
    operation: Operation,
    local_id: &'a LocalId,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a ChangeData>,
    timestamp: i64,
}

impl TryFrom<WireChange> for Change {
    type Error = ProtocolError;

    fn try_from(wire: WireChange) -> Result<Self, Self::Error> {
        let data = match (wire.operation.needs_payload(), wire.data) {
            (true, Some(serde_json::Value::Null)) | (true, None) => None,
            (true, Some(value)) => Some(ChangeData::parse(wire.table, value)?),
            (false, _) => None,
        };
        let change = Self {
            id: wire.id,
            table: wire.table,
            operation: wire.operation,
            local_id: wire.local_id,
            data,
            timestamp: wire.timestamp,
        };
        change.validate()?;
        Ok(change)
    }
}

impl Serialize for Change {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireChangeRef {
            id: &self.id,
            table: self.table,
            operation: self.operation,
            local_id: &self.local_id,
            data: self.data.as_ref(),
            timestamp: self.timestamp,
        }
        .serialize(serializer)
    }
}
