//! The coordinator client contract.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{BindingLost, HealthStatus, Registration, SessionId};

/// Client of an external consensus-backed coordinator.
///
/// Implementations enforce their own request deadline; callers never wrap
/// these calls in an extra timeout.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Negotiate a new session named `name` that expires after `ttl` without renewal.
    async fn create_session(&self, name: &str, ttl: Duration) -> Result<SessionId>;

    /// Release a session and every key bound to it.
    async fn destroy_session(&self, id: &SessionId) -> Result<()>;

    /// Reset the session TTL.
    ///
    /// Fails with [`CoordinatorError::SessionExpired`](crate::CoordinatorError::SessionExpired)
    /// once the coordinator no longer knows the session.
    async fn renew_session(&self, id: &SessionId) -> Result<()>;

    /// Bind `key` to `value` under `session`.
    ///
    /// On success the returned notification fires once the binding is lost.
    async fn bind_key(&self, session: &SessionId, key: &str, value: &[u8]) -> Result<BindingLost>;

    /// Register (or re-register) an endpoint with its TTL check.
    async fn register_endpoint(&self, registration: &Registration) -> Result<()>;

    /// Remove an endpoint and its check.
    async fn deregister_endpoint(&self, id: &str) -> Result<()>;

    /// Assert the status of a TTL check.
    async fn assert_health(&self, check_id: &str, status: HealthStatus) -> Result<()>;
}
