//! CLI command implementations.

pub mod queue;
pub mod token;
