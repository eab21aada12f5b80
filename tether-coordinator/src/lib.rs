//! Coordinator client contract for tether.
//!
//! A coordinator is the external consensus-backed store that grants
//! renewable sessions, binds keys to them and tracks TTL health checks.
//! Everything in this crate sits at that boundary: the rest of tether only
//! talks to a coordinator through the [`Coordinator`] trait.
//!
//! # Key Types
//!
//! - [`Coordinator`] - Trait covering sessions, key binding, endpoints and health
//! - [`CoordinatorError`] - Error taxonomy surfaced to the maintainers
//! - [`ConsulCoordinator`] - Client for a Consul-compatible agent HTTP API
//! - [`InMemoryCoordinator`] - In-process coordinator with fault injection for tests

pub mod config;
pub mod consul;
pub mod error;
pub mod memory;
pub mod traits;
pub mod types;

// Re-exports
pub use config::CoordinatorConfig;
pub use consul::ConsulCoordinator;
pub use error::{CoordinatorError, Result};
pub use memory::{InMemoryCoordinator, Operation};
pub use traits::Coordinator;
pub use types::{BindingLost, HealthStatus, Registration, SessionId};
