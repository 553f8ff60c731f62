//! Push and pull wire messages.
//!
//! All messages are JSON. Every type offers `encode`/`decode` helpers so the
//! transport and the server agree on one byte format.

use crate::change::{Change, ChangeId};
use crate::entity::{Book, Chapter, Entity, LearningProgress, Section, VocabularyItem};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// A batch of changes sent by a client.
///
/// Encodes as a bare JSON array. Decoding also accepts an object of the form
/// `{"changes": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PushRequest {
    /// Changes in queue order.
    pub changes: Vec<Change>,
}

impl PushRequest {
    /// Creates a push request.
    pub fn new(changes: Vec<Change>) -> Self {
        Self { changes }
    }

    /// Encodes to JSON.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Decodes from JSON, validating every change.
    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        let changes = match value {
            Value::Object(mut map) => match map.remove("changes") {
                Some(changes) => changes,
                None => return Err(serde::de::Error::missing_field("changes")),
            },
            other => other,
        };
        Ok(Self {
            changes: serde_json::from_value(changes)?,
        })
    }

    /// Returns the number of changes.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns true if there are no changes.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Failure of a single change within an accepted push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeError {
    /// The change that failed.
    pub change_id: ChangeId,
    /// Human-readable reason.
    pub error: String,
}

impl ChangeError {
    /// Creates a per-change error.
    pub fn new(change_id: ChangeId, error: impl Into<String>) -> Self {
        Self {
            change_id,
            error: error.into(),
        }
    }
}

/// Server reply to a push.
///
/// `success` means the request as a whole was processed; individual changes
/// may still have failed and are listed in `errors`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    /// Whether the request was processed.
    pub success: bool,
    /// Number of changes that succeeded.
    #[serde(default)]
    pub processed: usize,
    /// Changes that failed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ChangeError>,
}

impl PushResponse {
    /// Creates a response for a processed request.
    pub fn processed(processed: usize, errors: Vec<ChangeError>) -> Self {
        Self {
            success: true,
            processed,
            errors,
        }
    }

    /// Returns the ids of failed changes.
    pub fn failed_ids(&self) -> HashSet<&ChangeId> {
        self.errors.iter().map(|e| &e.change_id).collect()
    }

    /// Encodes to JSON.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Decodes from JSON.
    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Body returned when a whole request is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always false.
    pub success: bool,
    /// Reason for the rejection.
    pub error: String,
}

impl ErrorResponse {
    /// Creates an error body.
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }

    /// Encodes to JSON.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Decodes from JSON.
    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Full snapshot of a user's data.
///
/// Only live rows are included; every foreign key is the parent's local id.
/// The auxiliary blobs are passed through verbatim and are `null` when unset.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    /// Live books.
    #[serde(default)]
    pub books: Vec<Book>,
    /// Live chapters.
    #[serde(default)]
    pub chapters: Vec<Chapter>,
    /// Live sections.
    #[serde(default)]
    pub sections: Vec<Section>,
    /// Live vocabulary items.
    #[serde(default)]
    pub vocabulary_items: Vec<VocabularyItem>,
    /// Learning progress records.
    #[serde(default)]
    pub learning_progress: Vec<LearningProgress>,
    /// Gamification state blob.
    #[serde(default)]
    pub gamification: Value,
    /// Achievements blob.
    #[serde(default)]
    pub achievements: Value,
    /// Settings blob.
    #[serde(default)]
    pub settings: Value,
    /// Server clock when the snapshot was taken (epoch millis).
    pub server_time: i64,
}

impl PullResponse {
    /// Returns every entity, parents before children.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.books
            .iter()
            .cloned()
            .map(Entity::Book)
            .chain(self.chapters.iter().cloned().map(Entity::Chapter))
            .chain(self.sections.iter().cloned().map(Entity::Section))
            .chain(
                self.vocabulary_items
                    .iter()
                    .cloned()
                    .map(Entity::VocabularyItem),
            )
            .chain(
                self.learning_progress
                    .iter()
                    .cloned()
                    .map(Entity::LearningProgress),
            )
    }

    /// Returns the total number of entities.
    pub fn entity_count(&self) -> usize {
        self.books.len()
            + self.chapters.len()
            + self.sections.len()
            + self.vocabulary_items.len()
            + self.learning_progress.len()
    }

    /// Encodes to JSON.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Decodes from JSON.
    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}
