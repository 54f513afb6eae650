//! Plugin System
//!
//! Runtime for third-party extension modules: discovery, loading into
//! isolation units, lifecycle and event dispatch with fault containment, and
//! selective reload and unload.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Plugin System                            │
//! ├─────────────────┬─────────────────┬─────────────────────────┤
//! │  Plugin Manager │  Plugin Context │   Plugin Loader         │
//! │                 │                 │                         │
//! │ • Lifecycle     │ • Host services │ • Isolation units       │
//! │ • Dispatch      │ • Settings      │ • ABI checks            │
//! │ • Enable/reload │ • Log channel   │ • Hot reload            │
//! └─────────────────┴─────────────────┴─────────────────────────┘
//! ```

pub mod context;
pub mod hotreload;
pub mod loader;
pub mod manager;
pub mod settings;
pub mod types;

pub use context::{PluginContext, PluginLogger};
pub use hotreload::{HotReloadConfig, PluginHotReloader};
pub use loader::{
    InProcessModuleLoader, IsolationUnit, ModuleLoader, NativeModuleLoader, PluginConstructor,
    PluginDeclaration, PluginFactory, PluginInstance, PluginRegistrar,
};
pub use manager::{DispatchReport, LoadSummary, PluginManager, PluginManagerStats};
pub use settings::{FromSettingValue, PluginSettingsStore, SettingValue};
pub use types::{
    EmulatorPlugin, HookKind, LaunchdeckPlugin, PluginDescriptor, PluginError, PluginEvent,
    PluginInfo, PluginKind, PluginState,
};

use crate::services::ServiceRegistry;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Plugin system configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PluginSystemConfig {
    /// Directory scanned (recursively) for plugin modules
    pub plugin_dir: PathBuf,
    /// Root under which each plugin gets `Plugins/<id>/`
    pub data_root: PathBuf,
    /// Upper bound for a single hook call in seconds; `None` waits forever
    pub hook_timeout_secs: Option<u64>,
    /// Reload modules when their files change
    pub hot_reload: bool,
    /// Quiet period before a changed module is reloaded
    pub debounce_ms: u64,
}

impl PluginSystemConfig {
    pub fn hook_timeout(&self) -> Option<Duration> {
        self.hook_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for PluginSystemConfig {
    fn default() -> Self {
        let plugin_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("Plugins")))
            .unwrap_or_else(|| PathBuf::from("Plugins"));
        let data_root = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("launchdeck");

        Self {
            plugin_dir,
            data_root,
            hook_timeout_secs: Some(30),
            hot_reload: false,
            debounce_ms: 500,
        }
    }
}

/// Plugin API version for compatibility checking
pub const PLUGIN_API_VERSION: &str = "1.0.0";

/// Create a manager with the native loader and run the initial load
pub async fn init_plugin_system(
    config: PluginSystemConfig,
    services: Arc<ServiceRegistry>,
) -> Result<Arc<PluginManager>, PluginError> {
    let manager = Arc::new(PluginManager::new(config, services, Arc::new(NativeModuleLoader::new())).await?);
    manager.load_all().await;
    Ok(manager)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_system_config_default() {
        let config = PluginSystemConfig::default();
        assert!(config.plugin_dir.ends_with("Plugins"));
        assert!(config.data_root.ends_with("launchdeck"));
        assert_eq!(config.hook_timeout(), Some(Duration::from_secs(30)));
        assert!(!config.hot_reload);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: PluginSystemConfig = toml::from_str("plugin_dir = \"/opt/plugins\"").unwrap();
        assert_eq!(config.plugin_dir, PathBuf::from("/opt/plugins"));
        assert_eq!(config.debounce_ms, 500);
    }

    #[tokio::test]
    async fn test_plugin_system_init_with_empty_directory() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = PluginSystemConfig {
            plugin_dir: temp_dir.path().join("Plugins"),
            data_root: temp_dir.path().join("data"),
            ..PluginSystemConfig::default()
        };

        let manager = init_plugin_system(config, crate::testing::fixtures::test_services())
            .await
            .unwrap();
        assert!(manager.get_loaded_plugins().await.is_empty());
        assert!(temp_dir.path().join("Plugins").is_dir());
    }
}
