//! State transitions emitted by the maintainers

use serde::{Deserialize, Serialize};

/// Events emitted by a [`PresenceMaintainer`](crate::PresenceMaintainer)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PresenceEvent {
    /// A session was negotiated
    SessionCreated { session: String },
    /// Session negotiation failed; retried after the retry interval
    SessionCreateFailed { error: String },
    /// A bind was dispatched
    BindStarted { session: String },
    /// The key is bound to the session
    BindSucceeded { session: String },
    /// The bind was rejected or never reached the coordinator
    BindFailed { session: String, error: String },
    /// The session monitor reported a failure
    SessionError { session: String, error: String },
    /// An invalid session was replaced
    SessionRecreated { previous: String, session: String },
    /// Replacing an invalid session failed
    RecreateFailed { previous: String, error: String },
    /// The coordinator reported the binding gone
    PresenceLost { session: String, reason: String },
    /// First successful bind of this run
    Ready,
    /// Shutdown requested
    ShuttingDown,
}

/// Events emitted by a [`ServiceRegistrar`](crate::ServiceRegistrar)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceEvent {
    /// A registration attempt was dispatched
    Registering { attempt: u32 },
    /// A registration attempt failed
    RegistrationFailed { attempt: u32, error: String },
    /// The endpoint is registered
    Registered,
    /// A passing assertion was accepted
    HealthAsserted,
    /// A passing assertion failed
    HealthAssertFailed { error: String },
    /// The coordinator no longer knows the endpoint
    RegistrationLost { error: String },
    /// Registered and passing for the first time this run
    Ready,
    /// Shutdown requested
    ShuttingDown,
    /// The endpoint was removed on shutdown
    Deregistered,
    /// The check was flipped to failing on shutdown
    MarkedFailing,
}
