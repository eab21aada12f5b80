//! Configuration for the maintainers.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_coordinator::Registration;

use crate::error::ConfigError;

/// Default session TTL for presence locks.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(15);

/// Default delay before re-acquiring after a failure.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Default TTL of a service health check.
pub const DEFAULT_SERVICE_TTL: Duration = Duration::from_secs(10);

fn default_lock_ttl() -> Duration {
    DEFAULT_LOCK_TTL
}

fn default_retry_interval() -> Duration {
    DEFAULT_RETRY_INTERVAL
}

fn default_service_ttl() -> Duration {
    DEFAULT_SERVICE_TTL
}

fn default_attempts() -> u32 {
    5
}

fn default_attempt_delay() -> Duration {
    Duration::from_millis(200)
}

fn default_registration_interval() -> Duration {
    Duration::from_secs(1)
}

/// Key/value presence kept alive by a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Key to bind.
    #[serde(default)]
    pub key: String,

    /// Value advertised under the key.
    #[serde(default)]
    pub value: String,

    /// Session TTL.
    #[serde(default = "default_lock_ttl", with = "humantime_serde")]
    pub ttl: Duration,

    /// Delay before recovering from an error or a lost binding.
    #[serde(default = "default_retry_interval", with = "humantime_serde")]
    pub retry_interval: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            key: String::new(),
            value: String::new(),
            ttl: DEFAULT_LOCK_TTL,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

impl PresenceConfig {
    /// Presence of `value` under `key` with default timings.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Reject configurations the maintainer cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key.is_empty() {
            return Err(ConfigError::Empty {
                field: "presence.key",
            });
        }
        if self.ttl.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "presence.ttl",
            });
        }
        if self.retry_interval.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "presence.retry_interval",
            });
        }
        Ok(())
    }
}

/// How registration failures are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RegistrationPolicy {
    /// Try `attempts` times, `delay` apart, then fail the run.
    Bounded {
        #[serde(default = "default_attempts")]
        attempts: u32,
        #[serde(default = "default_attempt_delay", with = "humantime_serde")]
        delay: Duration,
    },
    /// Retry every `interval` until the coordinator accepts.
    Unbounded {
        #[serde(default = "default_registration_interval", with = "humantime_serde")]
        interval: Duration,
    },
}

impl Default for RegistrationPolicy {
    fn default() -> Self {
        Self::Unbounded {
            interval: default_registration_interval(),
        }
    }
}

impl RegistrationPolicy {
    /// Delay before the next attempt after `failed` consecutive failures,
    /// or `None` once the policy is exhausted.
    #[must_use]
    pub fn next_delay(&self, failed: u32) -> Option<Duration> {
        match *self {
            Self::Bounded { attempts, delay } => (failed < attempts).then_some(delay),
            Self::Unbounded { interval } => Some(interval),
        }
    }
}

/// What the registrar tells the coordinator on shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Remove the endpoint entirely.
    #[default]
    Deregister,
    /// Keep the endpoint but flip its check to failing.
    MarkFailing,
}

/// Endpoint kept healthy by periodic TTL assertions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Endpoint identifier; defaults to the name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Service name.
    #[serde(default)]
    pub name: String,

    /// Advertised address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Advertised port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Check TTL.
    #[serde(default = "default_service_ttl", with = "humantime_serde")]
    pub ttl: Duration,

    #[serde(default)]
    pub registration: RegistrationPolicy,

    #[serde(default)]
    pub on_shutdown: ShutdownPolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            id: None,
            name: String::new(),
            address: None,
            port: None,
            ttl: DEFAULT_SERVICE_TTL,
            registration: RegistrationPolicy::default(),
            on_shutdown: ShutdownPolicy::default(),
        }
    }
}

impl ServiceConfig {
    /// Service `name` with default timings and policies.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_registration(mut self, policy: RegistrationPolicy) -> Self {
        self.registration = policy;
        self
    }

    #[must_use]
    pub fn with_on_shutdown(mut self, policy: ShutdownPolicy) -> Self {
        self.on_shutdown = policy;
        self
    }

    /// The endpoint record this configuration registers.
    #[must_use]
    pub fn registration(&self) -> Registration {
        Registration {
            id: self.id.clone().unwrap_or_else(|| self.name.clone()),
            name: self.name.clone(),
            address: self.address.clone(),
            port: self.port,
            ttl: self.ttl,
        }
    }

    /// Reject configurations the registrar cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Empty {
                field: "service.name",
            });
        }
        if self.ttl.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "service.ttl",
            });
        }
        match self.registration {
            RegistrationPolicy::Bounded { attempts: 0, .. } => Err(ConfigError::NoAttempts),
            RegistrationPolicy::Unbounded { interval } if interval.is_zero() => {
                Err(ConfigError::ZeroDuration {
                    field: "service.registration.interval",
                })
            }
            _ => Ok(()),
        }
    }
}
