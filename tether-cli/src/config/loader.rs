use super::types::TetherConfig;
use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

/// A loaded configuration and the file it came from
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: TetherConfig,
    /// `None` when no file was found and defaults apply
    pub source: Option<PathBuf>,
}

impl ConfigLoader {
    /// Load configuration from the first file found.
    ///
    /// An explicit path must exist. Otherwise the project config is tried,
    /// then the user config, then built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig> {
        if let Some(path) = explicit {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
            return Ok(LoadedConfig {
                config: Self::load_from_path(path)?,
                source: Some(path.to_path_buf()),
            });
        }

        let candidates = Self::search_paths();
        match Self::first_existing(&candidates) {
            Some(path) => Ok(LoadedConfig {
                config: Self::load_from_path(&path)?,
                source: Some(path),
            }),
            None => Ok(LoadedConfig {
                config: TetherConfig::default(),
                source: None,
            }),
        }
    }

    /// Candidate files in lookup order
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![Self::project_config_path()];
        paths.extend(Self::user_config_path());
        paths
    }

    /// Get user config path (platform-specific)
    pub fn user_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "tether").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get project config path
    /// Can be overridden with TETHER_PROJECT_CONFIG_DIR env var
    pub fn project_config_path() -> PathBuf {
        if let Ok(dir) = std::env::var("TETHER_PROJECT_CONFIG_DIR") {
            PathBuf::from(dir).join("config.toml")
        } else {
            PathBuf::from(".tether/config.toml")
        }
    }

    /// Parse a single config file
    pub fn load_from_path(path: &Path) -> Result<TetherConfig> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
    }

    fn first_existing(candidates: &[PathBuf]) -> Option<PathBuf> {
        candidates.iter().find(|path| path.exists()).cloned()
    }
}
