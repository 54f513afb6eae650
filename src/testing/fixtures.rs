//! Common test data for the plugin runtime and host services.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::models::{Emulator, Game};
use crate::plugins::PluginSystemConfig;
use crate::services::{
    GameLauncher, InMemoryEmulatorService, InMemoryGameLibrary, NullMediaScraper, ServiceRegistry,
    UserInteraction,
};

/// Interaction service that answers every question with "no"
struct SilentInteraction;

impl UserInteraction for SilentInteraction {
    fn show_message(&self, _title: &str, _message: &str) {}

    fn show_confirmation(&self, _title: &str, _message: &str) -> bool {
        false
    }
}

/// Registry backed by empty in-memory services
pub fn test_services() -> Arc<ServiceRegistry> {
    services_with_interaction(Arc::new(SilentInteraction))
}

pub fn services_with_interaction(interaction: Arc<dyn UserInteraction>) -> Arc<ServiceRegistry> {
    let library = Arc::new(InMemoryGameLibrary::new());
    let emulators = Arc::new(InMemoryEmulatorService::new());
    let launcher = Arc::new(GameLauncher::new(library.clone(), emulators.clone()));
    Arc::new(ServiceRegistry::new(
        library,
        emulators,
        launcher,
        Arc::new(NullMediaScraper),
        interaction,
    ))
}

/// Plugin config rooted in a temporary directory
pub fn manager_config(root: &Path) -> PluginSystemConfig {
    PluginSystemConfig {
        plugin_dir: root.join("Plugins"),
        data_root: root.join("data"),
        hook_timeout_secs: Some(5),
        hot_reload: false,
        debounce_ms: 50,
    }
}

/// Write a placeholder module file, creating `dir` if needed
pub fn module_file(dir: &Path, name: &str) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, b"module").unwrap();
    path
}

/// Emulator whose executable path points into `dir` (not created)
pub fn sample_emulator(dir: &Path) -> Emulator {
    Emulator::new(7, "snes9x", dir.join("snes9x"))
        .with_platform(1, true)
        .with_arguments("--fullscreen {0}")
}

/// Game whose ROM path points into `dir` (not created)
pub fn sample_game(dir: &Path) -> Game {
    Game::new(42, "Super Metroid", dir.join("super-metroid.sfc"), 1)
}
