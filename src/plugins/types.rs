//! Plugin System Types
//!
//! The plugin contract, the emulator-extension capability, and the records
//! and events the manager exposes about loaded plugins.

use crate::models::{Emulator, Game};
use crate::plugins::PluginContext;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Core plugin trait that all plugins must implement
///
/// Identity accessors must return the same values for the lifetime of the
/// instance. Hooks default to doing nothing, so a plugin only overrides the
/// events it cares about.
#[async_trait::async_trait]
pub trait LaunchdeckPlugin: Send + Sync {
    /// Unique plugin identifier
    fn id(&self) -> &str;

    /// Display name
    fn name(&self) -> &str;

    /// Semantic version string
    fn version(&self) -> &str;

    fn author(&self) -> &str;

    fn description(&self) -> &str;

    /// Called once right after construction, before the plugin is registered.
    /// An error here means the plugin is never registered.
    async fn on_load(&self, _context: Arc<PluginContext>) -> Result<(), PluginError> {
        Ok(())
    }

    /// Called once before the plugin's module is released. The context must
    /// not be relied on after this returns.
    async fn on_unload(&self) -> Result<(), PluginError> {
        Ok(())
    }

    /// Called once per host session after every discovered plugin has loaded
    async fn on_startup(&self) -> Result<(), PluginError> {
        Ok(())
    }

    /// Called before the emulator process for `game` is started
    async fn on_game_launch(&self, _game: &Game, _emulator: &Emulator) -> Result<(), PluginError> {
        Ok(())
    }

    /// Called after the emulator process for `game` exited
    async fn on_game_close(&self, _game: &Game) -> Result<(), PluginError> {
        Ok(())
    }

    /// Called when the host terminates, before `on_unload`
    async fn on_shutdown(&self) -> Result<(), PluginError> {
        Ok(())
    }

    /// Emulator-extension capability, if this plugin provides it
    fn as_emulator_plugin(&self) -> Option<&dyn EmulatorPlugin> {
        None
    }

    fn kind(&self) -> PluginKind {
        if self.as_emulator_plugin().is_some() {
            PluginKind::EmulatorExtension
        } else {
            PluginKind::General
        }
    }
}

/// Capability for plugins that manage emulators
#[async_trait::async_trait]
pub trait EmulatorPlugin: Send + Sync {
    /// Emulator IDs this plugin handles; `None` means all of them
    fn supported_emulator_ids(&self) -> Option<Vec<i64>> {
        None
    }

    fn supports_emulator(&self, emulator_id: i64) -> bool {
        self.supported_emulator_ids()
            .map_or(true, |ids| ids.contains(&emulator_id))
    }

    /// Whether a newer build of the emulator is available
    async fn check_for_updates(&self, emulator_id: i64) -> Result<bool, PluginError>;

    /// Update the emulator; returns whether anything changed
    async fn update_emulator(&self, emulator_id: i64) -> Result<bool, PluginError>;

    async fn configure_emulator(&self, emulator_id: i64) -> Result<(), PluginError>;
}

/// Plugin categories
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum PluginKind {
    General,
    EmulatorExtension,
    Theme,
    MediaScraper,
    ImportExport,
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            PluginKind::General => "general",
            PluginKind::EmulatorExtension => "emulator-extension",
            PluginKind::Theme => "theme",
            PluginKind::MediaScraper => "media-scraper",
            PluginKind::ImportExport => "import-export",
        };
        f.write_str(label)
    }
}

/// Plugin error types
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Plugin load failed: {0}")]
    LoadFailed(String),

    #[error("Plugin instantiation failed for {type_name}: {reason}")]
    InstantiationFailed { type_name: String, reason: String },

    #[error("Plugin {plugin_id} failed in {hook}: {reason}")]
    HookFailed {
        plugin_id: String,
        hook: HookKind,
        reason: String,
    },

    #[error("Plugin {plugin_id} timed out in {hook} after {timeout_ms}ms")]
    HookTimedOut {
        plugin_id: String,
        hook: HookKind,
        timeout_ms: u64,
    },

    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("Plugin already registered: {0}")]
    DuplicatePlugin(String),

    #[error("Plugin ABI mismatch: {0}")]
    IncompatibleAbi(String),

    #[error("Setting '{key}' holds {found}, not {expected}")]
    SettingTypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Plugin execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Plugin configuration error: {0}")]
    ConfigurationError(String),

    #[error("IO Error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for PluginError {
    fn from(err: std::io::Error) -> Self {
        PluginError::IoError(err.to_string())
    }
}

/// Lifecycle and event hooks, used for logging and error reporting
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    Load,
    Unload,
    Startup,
    GameLaunch,
    GameClose,
    Shutdown,
}

impl std::fmt::Display for HookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HookKind::Load => "on_load",
            HookKind::Unload => "on_unload",
            HookKind::Startup => "on_startup",
            HookKind::GameLaunch => "on_game_launch",
            HookKind::GameClose => "on_game_close",
            HookKind::Shutdown => "on_shutdown",
        };
        f.write_str(name)
    }
}

/// Identity metadata reported by a plugin implementation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginDescriptor {
    pub id: String,
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
}

impl PluginDescriptor {
    /// Snapshot the identity accessors of a live plugin
    pub fn of(plugin: &dyn LaunchdeckPlugin) -> Self {
        Self {
            id: plugin.id().to_string(),
            name: plugin.name().to_string(),
            version: plugin.version().to_string(),
            author: plugin.author().to_string(),
            description: plugin.description().to_string(),
        }
    }

    /// Parsed version, if the plugin reports valid semver
    pub fn semver(&self) -> Option<semver::Version> {
        semver::Version::parse(&self.version).ok()
    }
}

/// Lifecycle state of one plugin instance
///
/// `Discovered -> Loaded -> (Enabled <-> Disabled) -> Unloaded`. A reload
/// produces a new instance that walks the same path again. Snapshots only
/// ever show `Enabled` or `Disabled`; every transition is broadcast as
/// [`PluginEvent::StateChanged`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PluginState {
    Discovered,
    Loaded,
    Enabled,
    Disabled,
    Unloaded,
}

/// Snapshot of a registered plugin for hosts and UIs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    pub descriptor: PluginDescriptor,
    pub kind: PluginKind,
    pub state: PluginState,
    pub source_path: PathBuf,
    pub type_name: String,
    pub loaded_at: chrono::DateTime<chrono::Utc>,
}

impl PluginInfo {
    pub fn is_enabled(&self) -> bool {
        self.state == PluginState::Enabled
    }
}

/// Plugin system events
#[derive(Debug, Clone)]
pub enum PluginEvent {
    PluginLoaded { plugin_id: String, version: String },
    PluginUnloaded { plugin_id: String },
    PluginReloaded { plugin_id: String, version: String },
    PluginEnabledChanged { plugin_id: String, enabled: bool },
    ModuleFailed { path: PathBuf, error: String },
    HookFailed { plugin_id: String, hook: HookKind, error: String },
    StateChanged { plugin_id: String, state: PluginState },
}
