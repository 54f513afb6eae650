//! Configuration management for the launchdeck host.
//!
//! One TOML file holds the plugin runtime and logging settings. Missing
//! files and missing keys fall back to defaults.

pub mod loader;

use crate::logging::LogConfig;
use crate::plugins::PluginSystemConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use loader::ConfigLoader;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LaunchdeckConfig {
    pub plugins: PluginSystemConfig,
    pub logging: LogConfig,
}

impl LaunchdeckConfig {
    /// Reject settings the runtime cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.plugins.hook_timeout_secs == Some(0) {
            return Err(ConfigError::ValidationError(
                "plugins.hook_timeout_secs must be positive; omit it to disable the timeout".to_string(),
            ));
        }
        if self.plugins.hot_reload && self.plugins.debounce_ms == 0 {
            return Err(ConfigError::ValidationError(
                "plugins.debounce_ms must be positive when hot_reload is on".to_string(),
            ));
        }
        if self.plugins.plugin_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError("plugins.plugin_dir is empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),
}

/// Configuration manager
#[derive(Debug)]
pub struct ConfigManager {
    config: LaunchdeckConfig,
    config_path: PathBuf,
    loader: ConfigLoader,
}

impl ConfigManager {
    /// `<config_dir>/launchdeck/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("launchdeck")
            .join("config.toml")
    }

    /// Load from `config_path` (or the default path). A missing file yields
    /// the default configuration.
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config_path = config_path.unwrap_or_else(Self::default_path);
        let loader = ConfigLoader::new();

        let config = if config_path.exists() {
            loader.load_from_file(&config_path)?
        } else {
            LaunchdeckConfig::default()
        };
        config.validate()?;

        Ok(Self {
            config,
            config_path,
            loader,
        })
    }

    pub fn config(&self) -> &LaunchdeckConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut LaunchdeckConfig {
        &mut self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Re-read the file, keeping the current configuration on failure
    pub fn reload(&mut self) -> Result<(), ConfigError> {
        if !self.config_path.exists() {
            return Err(ConfigError::FileNotFound(self.config_path.clone()));
        }
        let config = self.loader.load_from_file(&self.config_path)?;
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<(), ConfigError> {
        self.config.validate()?;
        self.loader.save_to_file(&self.config, &self.config_path)
    }
}
