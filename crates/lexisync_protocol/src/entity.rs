//! Synchronized entity model.
//!
//! Entities are the shape the local store holds and the pull snapshot
//! returns: each is addressed by its [`LocalId`], and every parent reference
//! is the parent's local identifier (`local<Parent>Id` on the wire). Server
//! identifiers never appear here.

use crate::change::{
    BookData, ChangeData, ChapterData, LearningProgressData, SectionData, VocabularyItemData,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lowest ease factor a learning progress record may carry.
pub const MIN_EASE_FACTOR: f64 = 1.3;

/// Client-generated identifier, stable for the entity's whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(String);

impl LocalId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the identifier is empty or whitespace.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LocalId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for LocalId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The five synchronized tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityTable {
    /// Textbooks / sources.
    #[serde(rename = "books")]
    Books,
    /// Units within a book.
    #[serde(rename = "chapters")]
    Chapters,
    /// Lessons within a chapter.
    #[serde(rename = "sections")]
    Sections,
    /// Word/phrase pairs.
    #[serde(rename = "vocabularyItems")]
    VocabularyItems,
    /// Per-item review state.
    #[serde(rename = "learningProgress")]
    LearningProgress,
}

impl EntityTable {
    /// All tables, parents before children.
    pub const ALL: [EntityTable; 5] = [
        EntityTable::Books,
        EntityTable::Chapters,
        EntityTable::Sections,
        EntityTable::VocabularyItems,
        EntityTable::LearningProgress,
    ];

    /// Returns the wire name of the table.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityTable::Books => "books",
            EntityTable::Chapters => "chapters",
            EntityTable::Sections => "sections",
            EntityTable::VocabularyItems => "vocabularyItems",
            EntityTable::LearningProgress => "learningProgress",
        }
    }

    /// Parses a wire name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// Returns true if deletes on this table leave a tombstone.
    ///
    /// Learning progress rows are removed outright.
    pub fn has_tombstone(&self) -> bool {
        !matches!(self, EntityTable::LearningProgress)
    }
}

impl fmt::Display for EntityTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A textbook or other vocabulary source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    /// Local identifier.
    pub local_id: LocalId,
    /// Display name.
    pub name: String,
    /// Language being learned.
    pub language: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Cover color (e.g. `#3b82f6`).
    #[serde(default)]
    pub cover_color: Option<String>,
}

/// A unit within a book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    /// Local identifier.
    pub local_id: LocalId,
    /// Owning book.
    pub local_book_id: LocalId,
    /// Display name.
    pub name: String,
    /// Position within the book.
    pub order: i32,
}

/// A lesson within a chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    /// Local identifier.
    pub local_id: LocalId,
    /// Owning book.
    pub local_book_id: LocalId,
    /// Owning chapter.
    pub local_chapter_id: LocalId,
    /// Display name.
    pub name: String,
    /// Position within the chapter.
    pub order: i32,
    /// Whether the lesson has been covered in class.
    #[serde(default)]
    pub covered_in_class: bool,
}

/// One word or phrase pair.
///
/// Chapter and section are both set or both absent; absent means the item
/// sits unsorted at book level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VocabularyItem {
    /// Local identifier.
    pub local_id: LocalId,
    /// Owning book.
    pub local_book_id: LocalId,
    /// Owning chapter, if sorted.
    #[serde(default)]
    pub local_chapter_id: Option<LocalId>,
    /// Owning section, if sorted.
    #[serde(default)]
    pub local_section_id: Option<LocalId>,
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

/// Review state of one vocabulary item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningProgress {
    /// Local identifier.
    pub local_id: LocalId,
    /// Reviewed vocabulary item.
    pub local_vocabulary_item_id: LocalId,
    /// Ease factor, at least [`MIN_EASE_FACTOR`].
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

/// Any synchronized entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    /// A book.
    Book(Book),
    /// A chapter.
    Chapter(Chapter),
    /// A section.
    Section(Section),
    /// A vocabulary item.
    VocabularyItem(VocabularyItem),
    /// A learning progress record.
    LearningProgress(LearningProgress),
}

impl Entity {
    /// Returns the entity's table.
    pub fn table(&self) -> EntityTable {
        match self {
            Entity::Book(_) => EntityTable::Books,
            Entity::Chapter(_) => EntityTable::Chapters,
            Entity::Section(_) => EntityTable::Sections,
            Entity::VocabularyItem(_) => EntityTable::VocabularyItems,
            Entity::LearningProgress(_) => EntityTable::LearningProgress,
        }
    }

    /// Returns the entity's local identifier.
    pub fn local_id(&self) -> &LocalId {
        match self {
            Entity::Book(e) => &e.local_id,
            Entity::Chapter(e) => &e.local_id,
            Entity::Section(e) => &e.local_id,
            Entity::VocabularyItem(e) => &e.local_id,
            Entity::LearningProgress(e) => &e.local_id,
        }
    }

    /// Converts the entity into the payload a create/update change carries.
    pub fn to_change_data(&self) -> ChangeData {
        match self.clone() {
            Entity::Book(b) => ChangeData::Book(BookData {
                name: b.name,
                language: b.language,
                description: b.description,
                cover_color: b.cover_color,
            }),
            Entity::Chapter(c) => ChangeData::Chapter(ChapterData {
                book_id: c.local_book_id,
                name: c.name,
                order: c.order,
            }),
            Entity::Section(s) => ChangeData::Section(SectionData {
                book_id: s.local_book_id,
                chapter_id: s.local_chapter_id,
                name: s.name,
                order: s.order,
                covered_in_class: s.covered_in_class,
            }),
            Entity::VocabularyItem(v) => ChangeData::VocabularyItem(VocabularyItemData {
                book_id: v.local_book_id,
                chapter_id: v.local_chapter_id,
                section_id: v.local_section_id,
                source_text: v.source_text,
                target_text: v.target_text,
                notes: v.notes,
                image_ref: v.image_ref,
            }),
            Entity::LearningProgress(p) => ChangeData::LearningProgress(LearningProgressData {
                vocabulary_item_id: p.local_vocabulary_item_id,
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
