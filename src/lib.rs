// Launchdeck Library
//
// Game library host with a dynamic plugin runtime: plugin modules are
// discovered on disk, loaded into isolation units, and receive lifecycle and
// game events from the host with per-plugin fault containment.

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod plugins;
pub mod services;

#[cfg(test)]
pub mod testing;

// Re-export commonly used types
pub use config::{ConfigError, ConfigManager, LaunchdeckConfig};
pub use error::{LaunchdeckError, LaunchdeckResult};
pub use models::{Emulator, Game, GameMetadata, Platform};
pub use plugins::{
    EmulatorPlugin, LaunchdeckPlugin, PluginContext, PluginError, PluginManager, PluginSystemConfig,
};
pub use services::{GameLauncher, ServiceRegistry};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Compiler that built this crate; native plugin modules must match it
pub const RUSTC_VERSION: &str = env!("LAUNCHDECK_RUSTC_VERSION");
