//! Configuration management for sage-mem.
//!
//! Configuration is loaded from multiple sources with precedence:
//! 1. Command-line flags and environment variables (SAGE_DATA_DIR, SAGE_CONFIG)
//! 2. Config file (<data-dir>/config.toml)
//! 3. Default values

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use sage_memory::SageConfig;

/// Resolved CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the snapshot and default config file
    pub data_dir: PathBuf,

    /// Config file location, whether or not it exists
    pub config_path: PathBuf,

    /// Memory system configuration
    pub sage: SageConfig,
}

impl Config {
    /// Load configuration with the documented precedence
    pub fn load(config_override: Option<&Path>, data_dir_override: Option<PathBuf>) -> Result<Self> {
        let data_dir = data_dir_override.unwrap_or_else(default_data_dir);
        let config_path = config_override
            .map(Path::to_path_buf)
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let sage = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
            SageConfig::from_toml_str(&content)
                .with_context(|| format!("Invalid config file: {}", config_path.display()))?
        } else {
            tracing::debug!(path = %config_path.display(), "no config file, using defaults");
            SageConfig::default()
        };

        Ok(Self {
            data_dir,
            config_path,
            sage,
        })
    }

    /// Write the current memory configuration to `config_path`
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(&self.sage).context("Failed to serialize config")?;
        std::fs::write(&self.config_path, content)
            .with_context(|| format!("Failed to write config file: {}", self.config_path.display()))?;
        Ok(())
    }

    /// Snapshot location after resolving relative paths
    pub fn storage_path(&self) -> PathBuf {
        if self.sage.storage.path.is_absolute() {
            self.sage.storage.path.clone()
        } else {
            self.data_dir.join(&self.sage.storage.path)
        }
    }
}

fn default_data_dir() -> PathBuf {
    if let Some(proj_dirs) = ProjectDirs::from("dev", "sage", "sage-mem") {
        proj_dirs.data_dir().to_path_buf()
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sage")
    }
}
