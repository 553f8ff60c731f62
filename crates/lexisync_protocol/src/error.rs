//! Error types for protocol validation and conversion.

use crate::entity::EntityTable;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while validating or converting protocol values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// A create/update change arrived without a payload.
    #[error("{operation} on {table} requires a data payload")]
    MissingPayload {
        /// Target table.
        table: EntityTable,
        /// Operation name.
        operation: &'static str,
    },

    /// The payload does not match the table's schema.
    #[error("invalid {table} payload: {message}")]
    InvalidPayload {
        /// Target table.
        table: EntityTable,
        /// What was wrong.
        message: String,
    },

    /// A field holds a value outside its allowed range.
    #[error("field `{field}` out of range: {message}")]
    OutOfRange {
        /// Offending field.
        field: &'static str,
        /// What was wrong.
        message: String,
    },

    /// A required identifier is empty.
    #[error("empty identifier in `{field}`")]
    EmptyIdentifier {
        /// Offending field.
        field: &'static str,
    },

    /// A decimal value does not fit the declared precision.
    #[error("decimal {value} does not fit precision {precision}, scale {scale}")]
    DecimalOverflow {
        /// The value that was rejected.
        value: f64,
        /// Total significant digits.
        precision: u8,
        /// Digits after the decimal point.
        scale: u8,
    },
}

impl ProtocolError {
    /// Shorthand for an [`InvalidPayload`](Self::InvalidPayload) error.
    pub fn invalid_payload(table: EntityTable, message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            table,
            message: message.into(),
        }
    }

    /// Shorthand for an [`OutOfRange`](Self::OutOfRange) error.
    pub fn out_of_range(field: &'static str, message: impl Into<String>) -> Self {
        Self::OutOfRange {
            field,
            message: message.into(),
        }
    }
}
