//! Configuration for reaching a coordinator.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection settings for a Consul-compatible coordinator agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Agent address as `host:port`.
    #[serde(default = "default_address")]
    pub address: String,

    /// URL scheme, `http` or `https`.
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Deadline applied to every request.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// How long a key watch blocks on the agent before re-polling.
    #[serde(default = "default_watch_wait", with = "humantime_serde")]
    pub watch_wait: Duration,
}

fn default_address() -> String {
    "127.0.0.1:8500".to_string()
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_watch_wait() -> Duration {
    Duration::from_secs(30)
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            scheme: default_scheme(),
            request_timeout: default_request_timeout(),
            watch_wait: default_watch_wait(),
        }
    }
}

impl CoordinatorConfig {
    /// Use a custom agent address.
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Use a custom request deadline.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Use a custom blocking-query wait for key watches.
    #[must_use]
    pub fn with_watch_wait(mut self, wait: Duration) -> Self {
        self.watch_wait = wait;
        self
    }

    /// Base URL of the agent HTTP API.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("{}://{}/v1", self.scheme, self.address)
    }
}
