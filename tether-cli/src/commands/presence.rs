//! Hold a key/value presence until shutdown

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tether_coordinator::ConsulCoordinator;
use tether_core::{PresenceConfig, PresenceMaintainer, UuidGenerator};
use tracing::info;

use super::{Context, parse_duration};
use crate::process::run_until_signal;

/// Arguments for the presence command
#[derive(Debug, Args)]
pub struct PresenceArgs {
    /// Key to hold
    #[arg(short, long)]
    pub key: Option<String>,

    /// Value advertised under the key
    #[arg(long)]
    pub value: Option<String>,

    /// Session TTL (e.g. "15s")
    #[arg(long, value_parser = parse_duration)]
    pub ttl: Option<Duration>,

    /// Delay before re-acquiring after a failure (e.g. "5s")
    #[arg(long, value_parser = parse_duration)]
    pub retry_interval: Option<Duration>,
}

impl PresenceArgs {
    /// Apply flags on top of the file configuration
    pub fn apply(&self, mut config: PresenceConfig) -> PresenceConfig {
        if let Some(key) = &self.key {
            config.key = key.clone();
        }
        if let Some(value) = &self.value {
            config.value = value.clone();
        }
        if let Some(ttl) = self.ttl {
            config.ttl = ttl;
        }
        if let Some(interval) = self.retry_interval {
            config.retry_interval = interval;
        }
        config
    }
}

/// Run the presence command
pub async fn run(args: PresenceArgs, ctx: Context) -> Result<()> {
    let config = args.apply(ctx.config.presence);
    config.validate()?;

    info!(
        key = %config.key,
        coordinator = %ctx.config.coordinator.address,
        ttl = ?config.ttl,
        "Holding presence"
    );

    let coordinator = Arc::new(ConsulCoordinator::new(ctx.config.coordinator)?);
    let maintainer = PresenceMaintainer::new(coordinator, Arc::new(UuidGenerator), config)?;
    run_until_signal(maintainer).await
}
