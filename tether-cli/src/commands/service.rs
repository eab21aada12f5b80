//! Register an endpoint and keep its health check passing

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, ValueEnum};
use tether_coordinator::ConsulCoordinator;
use tether_core::{RegistrationPolicy, ServiceConfig, ServiceRegistrar, ShutdownPolicy};
use tracing::info;

use super::{Context, parse_duration};
use crate::process::run_until_signal;

/// What to tell the coordinator when stopping
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OnShutdown {
    /// Remove the endpoint
    Deregister,
    /// Keep the endpoint and mark its check failing
    MarkFailing,
}

impl From<OnShutdown> for ShutdownPolicy {
    fn from(value: OnShutdown) -> Self {
        match value {
            OnShutdown::Deregister => Self::Deregister,
            OnShutdown::MarkFailing => Self::MarkFailing,
        }
    }
}

/// Arguments for the service command
#[derive(Debug, Args)]
pub struct ServiceArgs {
    /// Service name
    #[arg(short, long)]
    pub name: Option<String>,

    /// Endpoint id (defaults to the name)
    #[arg(long)]
    pub id: Option<String>,

    /// Advertised address
    #[arg(long)]
    pub address: Option<String>,

    /// Advertised port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Health check TTL (e.g. "10s")
    #[arg(long, value_parser = parse_duration)]
    pub ttl: Option<Duration>,

    /// Give up after this many failed registrations
    #[arg(long)]
    pub attempts: Option<u32>,

    /// Delay between registration attempts (e.g. "1s")
    #[arg(long, value_parser = parse_duration)]
    pub retry_interval: Option<Duration>,

    /// Shutdown behaviour
    #[arg(long, value_enum)]
    pub on_shutdown: Option<OnShutdown>,
}

impl ServiceArgs {
    /// Apply flags on top of the file configuration
    pub fn apply(&self, mut config: ServiceConfig) -> ServiceConfig {
        if let Some(name) = &self.name {
            config.name = name.clone();
        }
        if let Some(id) = &self.id {
            config.id = Some(id.clone());
        }
        if let Some(address) = &self.address {
            config.address = Some(address.clone());
        }
        if let Some(port) = self.port {
            config.port = Some(port);
        }
        if let Some(ttl) = self.ttl {
            config.ttl = ttl;
        }
        if let Some(policy) = self.on_shutdown {
            config.on_shutdown = policy.into();
        }
        config.registration = self.registration_policy(config.registration);
        config
    }

    fn registration_policy(&self, current: RegistrationPolicy) -> RegistrationPolicy {
        let current_delay = match current {
            RegistrationPolicy::Bounded { delay, .. } => delay,
            RegistrationPolicy::Unbounded { interval } => interval,
        };
        let delay = self.retry_interval.unwrap_or(current_delay);

        match (self.attempts, current) {
            (Some(attempts), _) | (None, RegistrationPolicy::Bounded { attempts, .. }) => {
                RegistrationPolicy::Bounded { attempts, delay }
            }
            (None, RegistrationPolicy::Unbounded { .. }) => {
                RegistrationPolicy::Unbounded { interval: delay }
            }
        }
    }
}

/// Run the service command
pub async fn run(args: ServiceArgs, ctx: Context) -> Result<()> {
    let config = args.apply(ctx.config.service);
    config.validate()?;

    info!(
        service = %config.name,
        coordinator = %ctx.config.coordinator.address,
        ttl = ?config.ttl,
        policy = ?config.registration,
        "Registering service"
    );

    let coordinator = Arc::new(ConsulCoordinator::new(ctx.config.coordinator)?);
    let registrar = ServiceRegistrar::new(coordinator, config)?;
    run_until_signal(registrar).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_flags() -> ServiceArgs {
        ServiceArgs {
            name: None,
            id: None,
            address: None,
            port: None,
            ttl: None,
            attempts: None,
            retry_interval: None,
            on_shutdown: None,
        }
    }

    #[test]
    fn test_no_flags_keeps_file_config() {
        let file = ServiceConfig::new("web").with_port(8000);
        assert_eq!(no_flags().apply(file.clone()), file);
    }

    #[test]
    fn test_attempts_flag_switches_to_bounded() {
        let args = ServiceArgs {
            attempts: Some(3),
            ..no_flags()
        };

        let config = args.apply(ServiceConfig::new("web"));

        assert_eq!(
            config.registration,
            RegistrationPolicy::Bounded {
                attempts: 3,
                delay: Duration::from_secs(1)
            }
        );
    }

    #[test]
    fn test_retry_interval_keeps_policy_kind() {
        let args = ServiceArgs {
            retry_interval: Some(Duration::from_millis(250)),
            ..no_flags()
        };
        let file = ServiceConfig::new("web").with_registration(RegistrationPolicy::Bounded {
            attempts: 7,
            delay: Duration::from_secs(2),
        });

        let config = args.apply(file);

        assert_eq!(
            config.registration,
            RegistrationPolicy::Bounded {
                attempts: 7,
                delay: Duration::from_millis(250)
            }
        );
    }

    #[test]
    fn test_identity_and_shutdown_flags() {
        let args = ServiceArgs {
            name: Some("api".to_string()),
            id: Some("api-1".to_string()),
            on_shutdown: Some(OnShutdown::MarkFailing),
            ..no_flags()
        };

        let config = args.apply(ServiceConfig::default());

        assert_eq!(config.registration().id, "api-1");
        assert_eq!(config.registration().check_id(), "service:api-1");
        assert_eq!(config.on_shutdown, ShutdownPolicy::MarkFailing);
    }
}
