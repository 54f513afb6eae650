//! Host Services
//!
//! Capability interfaces the host exposes to plugins through their
//! [`PluginContext`](crate::plugins::PluginContext). Plugins only ever see
//! these traits; the concrete implementations are chosen by the host when it
//! builds the [`ServiceRegistry`].

pub mod launcher;
pub mod memory;

pub use launcher::{GameLauncher, LaunchHandle};
pub use memory::{ConsoleInteraction, InMemoryEmulatorService, InMemoryGameLibrary, NullMediaScraper};

use crate::models::{Emulator, Game, GameMetadata};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by host services
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Game not found: {0}")]
    GameNotFound(i64),

    #[error("Emulator not found: {0}")]
    EmulatorNotFound(i64),

    #[error("Game file not found: {0}")]
    GameFileMissing(PathBuf),

    #[error("Emulator executable not found: {0}")]
    EmulatorMissing(PathBuf),

    #[error("No emulator configured for platform {0}")]
    NoEmulatorForPlatform(i64),

    #[error("Invalid argument template: {0}")]
    InvalidArguments(String),

    #[error("Failed to launch game: {0}")]
    LaunchFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Query and mutate the game library
#[async_trait]
pub trait GameLibraryService: Send + Sync {
    async fn get_all_games(&self) -> Result<Vec<Game>, ServiceError>;
    async fn get_games_by_platform(&self, platform_id: i64) -> Result<Vec<Game>, ServiceError>;
    async fn get_favorite_games(&self) -> Result<Vec<Game>, ServiceError>;
    async fn get_recently_played_games(&self, count: usize) -> Result<Vec<Game>, ServiceError>;
    async fn search_games(&self, term: &str) -> Result<Vec<Game>, ServiceError>;
    async fn get_game_by_id(&self, id: i64) -> Result<Option<Game>, ServiceError>;
    async fn add_game(&self, game: Game) -> Result<Game, ServiceError>;
    async fn update_game(&self, game: Game) -> Result<(), ServiceError>;
    async fn delete_game(&self, id: i64) -> Result<(), ServiceError>;
    async fn toggle_favorite(&self, game_id: i64) -> Result<(), ServiceError>;
    async fn update_play_stats(&self, game_id: i64) -> Result<(), ServiceError>;
}

/// Query and resolve emulator configurations
#[async_trait]
pub trait EmulatorService: Send + Sync {
    async fn get_all_emulators(&self) -> Result<Vec<Emulator>, ServiceError>;
    async fn get_emulators_by_platform(&self, platform_id: i64) -> Result<Vec<Emulator>, ServiceError>;
    async fn get_emulator_by_id(&self, id: i64) -> Result<Option<Emulator>, ServiceError>;
    async fn get_default_emulator_for_platform(&self, platform_id: i64) -> Result<Option<Emulator>, ServiceError>;
    async fn add_emulator(&self, emulator: Emulator) -> Result<Emulator, ServiceError>;
    async fn update_emulator(&self, emulator: Emulator) -> Result<(), ServiceError>;
    async fn delete_emulator(&self, id: i64) -> Result<(), ServiceError>;
}

/// Start games in their emulator
#[async_trait]
pub trait GameLauncherService: Send + Sync {
    /// Launch `game`, using `emulator` when given and otherwise resolving one
    async fn launch_game(&self, game: &Game, emulator: Option<Emulator>) -> Result<bool, ServiceError>;
    async fn validate_emulator(&self, emulator: &Emulator) -> bool;
    async fn validate_game_file(&self, game: &Game) -> bool;
}

/// Metadata and artwork lookup
#[async_trait]
pub trait MediaScraperService: Send + Sync {
    async fn download_box_art(&self, game: &Game) -> Result<bool, ServiceError>;
    async fn download_screenshot(&self, game: &Game) -> Result<bool, ServiceError>;
    async fn download_background(&self, game: &Game) -> Result<bool, ServiceError>;
    async fn search_game_metadata(&self, title: &str, platform_id: i64) -> Result<Option<GameMetadata>, ServiceError>;
    async fn update_game_metadata(&self, game: &Game) -> Result<bool, ServiceError>;
}

/// Blocking user-facing notifications
#[cfg_attr(test, mockall::automock)]
pub trait UserInteraction: Send + Sync {
    /// Show a message; returns once the user dismissed it
    fn show_message(&self, title: &str, message: &str);
    /// Ask a yes/no question
    fn show_confirmation(&self, title: &str, message: &str) -> bool;
}

/// Shared host services handed to every plugin context
///
/// Contexts hold an `Arc` to the same registry; no plugin gets exclusive
/// access to any service.
#[derive(Clone)]
pub struct ServiceRegistry {
    pub game_library: Arc<dyn GameLibraryService>,
    pub emulators: Arc<dyn EmulatorService>,
    pub launcher: Arc<dyn GameLauncherService>,
    pub media_scraper: Arc<dyn MediaScraperService>,
    pub interaction: Arc<dyn UserInteraction>,
}

impl ServiceRegistry {
    pub fn new(
        game_library: Arc<dyn GameLibraryService>,
        emulators: Arc<dyn EmulatorService>,
        launcher: Arc<dyn GameLauncherService>,
        media_scraper: Arc<dyn MediaScraperService>,
        interaction: Arc<dyn UserInteraction>,
    ) -> Self {
        Self {
            game_library,
            emulators,
            launcher,
            media_scraper,
            interaction,
        }
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("game_library", &"<GameLibraryService>")
            .field("emulators", &"<EmulatorService>")
            .field("launcher", &"<GameLauncherService>")
            .field("media_scraper", &"<MediaScraperService>")
            .field("interaction", &"<UserInteraction>")
            .finish()
    }
}
