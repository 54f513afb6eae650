//! Configuration loading and saving utilities.

use crate::config::{ConfigError, LaunchdeckConfig};
use std::path::Path;
use tracing::debug;

/// Configuration loader/saver
#[derive(Debug, Default)]
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn new() -> Self {
        Self
    }

    pub fn load_from_file(&self, path: &Path) -> Result<LaunchdeckConfig, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: LaunchdeckConfig = toml::from_str(&content)?;
        debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn save_to_file(&self, config: &LaunchdeckConfig, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(config)?;
        std::fs::write(path, content)?;
        debug!("Saved configuration to {:?}", path);
        Ok(())
    }
}
