use serde::{Deserialize, Serialize};
use tether_coordinator::CoordinatorConfig;
use tether_core::{PresenceConfig, ServiceConfig};

/// Configuration as stored in TOML files
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct TetherConfig {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    #[serde(default)]
    pub presence: PresenceConfig,

    #[serde(default)]
    pub service: ServiceConfig,
}
