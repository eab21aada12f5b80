//! Value types exchanged with a coordinator.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Opaque session token assigned by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap a coordinator-issued token.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Health signal asserted against a TTL check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Passing,
    Failing,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passing => write!(f, "passing"),
            Self::Failing => write!(f, "failing"),
        }
    }
}

/// A named endpoint with a TTL health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Unique endpoint identifier.
    pub id: String,
    /// Service name the endpoint belongs to.
    pub name: String,
    /// Advertised address, if any.
    pub address: Option<String>,
    /// Advertised port, if any.
    pub port: Option<u16>,
    /// How long the check stays passing without a renewal.
    pub ttl: Duration,
}

impl Registration {
    /// Create a registration whose id and name are both `name`.
    pub fn new(name: impl Into<String>, ttl: Duration) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            address: None,
            port: None,
            ttl,
        }
    }

    /// Set the advertised address.
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Set the advertised port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Identifier of the TTL check attached to this endpoint.
    #[must_use]
    pub fn check_id(&self) -> String {
        format!("service:{}", self.id)
    }
}

/// One-shot notification that a key binding was lost.
///
/// Returned by a successful bind. It resolves once, with a human-readable
/// reason, when the coordinator reports that the key is no longer bound to
/// the session. A backend that stops watching without reporting a reason is
/// treated as a loss as well.
#[derive(Debug)]
pub struct BindingLost {
    rx: oneshot::Receiver<String>,
}

impl BindingLost {
    /// Create a notification and the sender that fires it.
    #[must_use]
    pub fn channel() -> (oneshot::Sender<String>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Wait until the binding is lost.
    ///
    /// Cancel-safe. Must not be awaited again after it has resolved.
    pub async fn wait(&mut self) -> String {
        match (&mut self.rx).await {
            Ok(reason) => reason,
            Err(_) => "binding watch ended".to_string(),
        }
    }
}
