//! Error types for tether-core

use thiserror::Error;

use tether_coordinator::CoordinatorError;

use crate::ids::IdError;

/// Errors from creating or replacing a session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Failed to generate session identifier: {0}")]
    Identifier(#[from] IdError),

    #[error("Failed to create session: {0}")]
    CreateFailed(#[source] CoordinatorError),
}

impl SessionError {
    /// Whether retrying later can succeed.
    ///
    /// Identifier generation failures point at the environment and are
    /// never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CreateFailed(_))
    }
}

/// Errors that end a maintainer's `run`
#[derive(Error, Debug)]
pub enum MaintainerError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Registration failed after {attempts} attempts: {last}")]
    RegistrationExhausted {
        attempts: u32,
        #[source]
        last: CoordinatorError,
    },
}

/// Errors from validating maintainer configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("bounded registration needs at least one attempt")]
    NoAttempts,
}
