//! Unique identifier generation.
//!
//! Session names must be unique per negotiation. Generation is injected so
//! tests can make it deterministic or make it fail.

use thiserror::Error;

/// Failure to produce an identifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("identifier source unavailable: {0}")]
    Unavailable(String),
}

/// Source of unique identifiers.
pub trait IdGenerator: Send + Sync {
    /// Produce a fresh identifier.
    fn generate(&self) -> Result<String, IdError>;
}

/// Random v4 UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> Result<String, IdError> {
        Ok(uuid::Uuid::new_v4().to_string())
    }
}
