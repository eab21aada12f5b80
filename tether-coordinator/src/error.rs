//! Error types for coordinator operations.

/// Error type for coordinator operations.
///
/// Variants carry rendered messages rather than source errors so that a
/// failure can be recorded by a maintainer loop and replayed in events.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    /// The session outlived its TTL without a renewal.
    #[error("session expired")]
    SessionExpired,

    /// The coordinator does not recognise the session.
    #[error("invalid session: {0}")]
    SessionInvalid(String),

    /// The coordinator could not be reached.
    #[error("coordinator unreachable: {0}")]
    Unreachable(String),

    /// The request exceeded the client deadline.
    #[error("coordinator request timed out")]
    Timeout,

    /// The referenced check, service or key does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The key is bound to a different session.
    #[error("key {0} is held by another session")]
    LockHeld(String),

    /// Anything the coordinator reported that fits no other variant.
    #[error("coordinator error: {0}")]
    Unknown(String),
}

impl CoordinatorError {
    /// Whether the error means the session itself can no longer be used.
    #[must_use]
    pub fn is_session_invalid(&self) -> bool {
        matches!(self, Self::SessionExpired | Self::SessionInvalid(_))
    }

    /// Whether the error is a transport-level failure worth retrying as-is.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Timeout)
    }
}

impl From<reqwest::Error> for CoordinatorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() || e.is_request() {
            Self::Unreachable(e.to_string())
        } else {
            Self::Unknown(e.to_string())
        }
    }
}

impl From<serde_json::Error> for CoordinatorError {
    fn from(e: serde_json::Error) -> Self {
        Self::Unknown(format!("malformed response: {e}"))
    }
}

/// Result type alias for coordinator operations.
pub type Result<T> = std::result::Result<T, CoordinatorError>;
