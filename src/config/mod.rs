//! Configuration management for Cardkeep

pub mod schema;

pub use schema::Config;

use crate::artifact::{AtomicArtifactWriter, Validator};
use crate::error::{CardkeepError, CardkeepResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cardkeep")
            .join("config.toml")
    }

    /// Get the default state directory path
    pub fn default_state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cardkeep")
    }

    /// Resolve the state directory for a loaded config
    pub fn state_dir(config: &Config) -> PathBuf {
        config
            .paths
            .state_dir
            .clone()
            .unwrap_or_else(Self::default_state_dir)
    }

    /// Directory holding one circuit record per dependency
    pub fn circuit_dir(config: &Config) -> PathBuf {
        Self::state_dir(config).join("circuit")
    }

    /// Directory holding cached responses, one subdirectory per namespace
    pub fn cache_dir(config: &Config) -> PathBuf {
        Self::state_dir(config).join("cache")
    }

    /// Directory holding one hash record per generator
    pub fn hashes_dir(config: &Config) -> PathBuf {
        Self::state_dir(config).join("hashes")
    }

    /// Path of the JSON-lines run log
    pub fn run_log_path(config: &Config) -> PathBuf {
        Self::state_dir(config).join("runs.log")
    }

    /// Load configuration, falling back to defaults if the file is missing
    pub async fn load(&self) -> CardkeepResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> CardkeepResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| CardkeepError::io(format!("reading config from {}", path.display()), e))?;

        toml::from_str(&content).map_err(|e| CardkeepError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> CardkeepResult<()> {
        let content = toml::to_string_pretty(config)?;
        AtomicArtifactWriter::new()
            .write(&self.config_path, content.as_bytes(), Validator::Toml)
            .await?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure all state directories exist
    pub async fn ensure_state_dirs(config: &Config) -> CardkeepResult<()> {
        let dirs = [
            Self::state_dir(config),
            Self::circuit_dir(config),
            Self::cache_dir(config),
            Self::hashes_dir(config),
        ];

        for dir in &dirs {
            fs::create_dir_all(dir).await.map_err(|e| {
                CardkeepError::io(format!("creating directory {}", dir.display()), e)
            })?;
        }

        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
