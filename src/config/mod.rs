//! Configuration loading for bucketlib.

use std::path::PathBuf;

use anyhow::Context;
use clap::ValueEnum;
use directories::{BaseDirs, ProjectDirs};
use serde::Deserialize;

use crate::store::NetworkMode;

/// Environment variable pointing at an explicit config file.
pub const CONFIG_ENV: &str = "BUCKETLIB_CONFIG";

/// Top-level configuration loaded from config.toml.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
}

/// Which cluster implementation backs the keywords.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Buckets are directories under `data_dir`.
    #[default]
    Local,
    /// Buckets live in memory for the duration of one run.
    Memory,
}

/// Configuration for the document store.
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

/// Defaults applied to every connection.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub network: NetworkMode,
}

fn default_data_dir() -> String {
    ProjectDirs::from("", "", "bucketlib").map_or_else(
        || "./buckets".to_string(),
        |dirs| dirs.data_dir().join("buckets").display().to_string(),
    )
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            data_dir: default_data_dir(),
        }
    }
}

impl Config {
    /// Load config from `$BUCKETLIB_CONFIG` or ~/.config/bucketlib/config.toml,
    /// or return defaults when neither exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> anyhow::Result<Self> {
        if let Some(path) = Self::config_path()
            && path.exists()
        {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("parsing {}", path.display()))?;
            return Ok(config);
        }

        Ok(Config::default())
    }

    #[must_use]
    pub fn config_path() -> Option<PathBuf> {
        if let Ok(explicit) = std::env::var(CONFIG_ENV) {
            return Some(PathBuf::from(explicit));
        }
        ProjectDirs::from("", "", "bucketlib").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Data directory with `~` expanded.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        expand_tilde(&self.store.data_dir)
    }
}

/// Expand ~ to the user's home directory.
#[must_use]
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(base_dirs) = BaseDirs::new()
    {
        return base_dirs.home_dir().join(rest);
    }
    PathBuf::from(path)
}
