//! # LexiSync Protocol
//!
//! Shared types for LexiSync synchronization.
//!
//! This crate provides:
//! - The entity model (books → chapters → sections → vocabulary items →
//!   learning progress), addressed by client-generated local identifiers
//! - `Change`, a queued mutation whose payload is a tagged union keyed by
//!   table and validated at the boundary
//! - Push and pull wire messages (JSON)
//! - Fixed-precision decimal conversion for numeric fields stored with a
//!   declared precision on the server
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod decimal;
mod entity;
mod error;
mod messages;

pub use change::{
    BookData, Change, ChangeData, ChangeId, ChapterData, LearningProgressData, Operation,
    Placement, SectionData, VocabularyItemData,
};
pub use decimal::{FixedDecimal, EASE_FACTOR_PRECISION, EASE_FACTOR_SCALE};
pub use entity::{
    Book, Chapter, Entity, EntityTable, LearningProgress, LocalId, Section, VocabularyItem,
    MIN_EASE_FACTOR,
};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{ChangeError, ErrorResponse, PullResponse, PushRequest, PushResponse};

/// Current time as Unix epoch milliseconds.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
