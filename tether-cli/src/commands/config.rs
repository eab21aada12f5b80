use std::path::Path;

use crate::config::ConfigLoader;
use anyhow::Result;
use clap::{Args, Subcommand};

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the configuration in effect
    Show,
    /// Show configuration file paths
    Path,
}

pub fn run(args: ConfigArgs, explicit: Option<&Path>) -> Result<()> {
    match args.command {
        ConfigCommands::Show => show_config(explicit),
        ConfigCommands::Path => show_paths(explicit),
    }
}

fn show_config(explicit: Option<&Path>) -> Result<()> {
    let loaded = ConfigLoader::load(explicit)?;
    match &loaded.source {
        Some(path) => println!("# Loaded from {}", path.display()),
        None => println!("# No config file found, using defaults"),
    }
    let toml_str = toml::to_string_pretty(&loaded.config)?;
    println!("{}", toml_str);
    Ok(())
}

fn show_paths(explicit: Option<&Path>) -> Result<()> {
    if let Some(path) = explicit {
        println!("Explicit config: {:?}", path);
    }
    println!("Project config:  {:?}", ConfigLoader::project_config_path());
    println!("User config:     {:?}", ConfigLoader::user_config_path());
    Ok(())
}
