use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod process;

use commands::Context;
use config::ConfigLoader;

#[derive(Parser)]
#[command(name = "tether", about = "Keep session locks and service heartbeats alive")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: .tether/config.toml, then the user config)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Coordinator agent address as host:port
    #[arg(long, global = true)]
    coordinator: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Hold a key bound to a renewable session
    Presence(commands::presence::PresenceArgs),
    /// Register an endpoint and keep its health check passing
    Service(commands::service::ServiceArgs),
    /// Manage configuration
    Config(commands::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let explicit = cli.config.as_deref();
    match cli.command {
        Commands::Presence(args) => {
            let ctx = load_context(explicit, cli.coordinator)?;
            commands::presence::run(args, ctx).await
        }
        Commands::Service(args) => {
            let ctx = load_context(explicit, cli.coordinator)?;
            commands::service::run(args, ctx).await
        }
        Commands::Config(args) => commands::config::run(args, explicit),
    }
}

/// Load the config file and apply global flag overrides
fn load_context(explicit: Option<&Path>, coordinator: Option<String>) -> Result<Context> {
    let mut loaded = ConfigLoader::load(explicit)?;
    if let Some(path) = &loaded.source {
        debug!(path = %path.display(), "Loaded config");
    }
    if let Some(address) = coordinator {
        loaded.config.coordinator.address = address;
    }
    Ok(Context {
        config: loaded.config,
    })
}
