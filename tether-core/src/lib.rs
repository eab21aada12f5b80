//! tether-core: maintainers that keep ephemeral registrations alive
//!
//! This crate builds on the [`tether_coordinator::Coordinator`] contract:
//!
//! - **Session management** - [`SessionManager`] negotiates renewable sessions and
//!   reports, once, when a [`Session`] can no longer be used
//! - **Presence** - [`PresenceMaintainer`] keeps a key/value pair bound to a live
//!   session, recreating the session and rebinding after any loss
//! - **Service heartbeat** - [`ServiceRegistrar`] registers an endpoint and asserts
//!   its TTL check every half TTL
//! - **Supervision** - [`Runner`] and [`ReadySignal`] connect a maintainer to the
//!   process that runs it
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │              maintainer control loop           │
//! │  select! { shutdown | task outcome |           │
//! │            session error | binding lost |      │
//! │            retry / renewal timer }             │
//! └───────────────┬───────────────────▲───────────┘
//!                 │ spawn             │ mpsc outcome
//!         ┌───────▼───────────────────┴──────┐
//!         │   coordinator call (one task)     │
//!         └───────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod presence;
pub mod runner;
pub mod service;
pub mod session;
pub mod timer;

// Re-export key types for convenience
pub use config::{PresenceConfig, RegistrationPolicy, ServiceConfig, ShutdownPolicy};
pub use error::{ConfigError, MaintainerError, SessionError};
pub use events::{PresenceEvent, ServiceEvent};
pub use ids::{IdError, IdGenerator, UuidGenerator};
pub use presence::PresenceMaintainer;
pub use runner::{ReadySignal, Runner};
pub use service::ServiceRegistrar;
pub use session::{Session, SessionManager};
pub use timer::{RetryTimer, renewal_period};
