pub mod config;
pub mod presence;
pub mod service;

use std::time::Duration;

use crate::config::TetherConfig;

/// Settings shared by every command
#[derive(Debug)]
pub struct Context {
    pub config: TetherConfig,
}

/// Parse a human-readable duration such as "15s" or "250ms"
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(s).map_err(|e| e.to_string())
}
