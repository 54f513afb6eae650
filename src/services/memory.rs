//! In-memory host services used by the CLI host and the test suite.

use super::{EmulatorService, GameLibraryService, MediaScraperService, ServiceError, UserInteraction};
use crate::models::{Emulator, Game, GameMetadata};
use async_trait::async_trait;
use chrono::Utc;
use std::io::{BufRead, Write};
use tokio::sync::RwLock;
use tracing::debug;

/// Game library kept in a vector
#[derive(Debug, Default)]
pub struct InMemoryGameLibrary {
    games: RwLock<Vec<Game>>,
}

impl InMemoryGameLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_games(games: Vec<Game>) -> Self {
        Self {
            games: RwLock::new(games),
        }
    }
}

#[async_trait]
impl GameLibraryService for InMemoryGameLibrary {
    async fn get_all_games(&self) -> Result<Vec<Game>, ServiceError> {
        Ok(self.games.read().await.clone())
    }

    async fn get_games_by_platform(&self, platform_id: i64) -> Result<Vec<Game>, ServiceError> {
        let games = self.games.read().await;
        Ok(games.iter().filter(|g| g.platform_id == platform_id).cloned().collect())
    }

    async fn get_favorite_games(&self) -> Result<Vec<Game>, ServiceError> {
        let games = self.games.read().await;
        Ok(games.iter().filter(|g| g.is_favorite).cloned().collect())
    }

    async fn get_recently_played_games(&self, count: usize) -> Result<Vec<Game>, ServiceError> {
        let mut played: Vec<Game> = self
            .games
            .read()
            .await
            .iter()
            .filter(|g| g.last_played_at.is_some())
            .cloned()
            .collect();
        played.sort_by(|a, b| b.last_played_at.cmp(&a.last_played_at));
        played.truncate(count);
        Ok(played)
    }

    async fn search_games(&self, term: &str) -> Result<Vec<Game>, ServiceError> {
        let needle = term.to_lowercase();
        let games = self.games.read().await;
        Ok(games
            .iter()
            .filter(|g| g.title.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }

    async fn get_game_by_id(&self, id: i64) -> Result<Option<Game>, ServiceError> {
        Ok(self.games.read().await.iter().find(|g| g.id == id).cloned())
    }

    async fn add_game(&self, mut game: Game) -> Result<Game, ServiceError> {
        let mut games = self.games.write().await;
        if game.id == 0 {
            game.id = games.iter().map(|g| g.id).max().unwrap_or(0) + 1;
        }
        games.push(game.clone());
        Ok(game)
    }

    async fn update_game(&self, mut game: Game) -> Result<(), ServiceError> {
        let mut games = self.games.write().await;
        let slot = games
            .iter_mut()
            .find(|g| g.id == game.id)
            .ok_or(ServiceError::GameNotFound(game.id))?;
        game.updated_at = Some(Utc::now());
        *slot = game;
        Ok(())
    }

    async fn delete_game(&self, id: i64) -> Result<(), ServiceError> {
        self.games.write().await.retain(|g| g.id != id);
        Ok(())
    }

    async fn toggle_favorite(&self, game_id: i64) -> Result<(), ServiceError> {
        let mut games = self.games.write().await;
        let game = games
            .iter_mut()
            .find(|g| g.id == game_id)
            .ok_or(ServiceError::GameNotFound(game_id))?;
        game.is_favorite = !game.is_favorite;
        Ok(())
    }

    async fn update_play_stats(&self, game_id: i64) -> Result<(), ServiceError> {
        let mut games = self.games.write().await;
        let game = games
            .iter_mut()
            .find(|g| g.id == game_id)
            .ok_or(ServiceError::GameNotFound(game_id))?;
        game.play_count += 1;
        game.last_played_at = Some(Utc::now());
        debug!("Play stats updated for game {} ({} plays)", game.id, game.play_count);
        Ok(())
    }
}

/// Emulator configurations kept in a vector
#[derive(Debug, Default)]
pub struct InMemoryEmulatorService {
    emulators: RwLock<Vec<Emulator>>,
}

impl InMemoryEmulatorService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_emulators(emulators: Vec<Emulator>) -> Self {
        Self {
            emulators: RwLock::new(emulators),
        }
    }
}

#[async_trait]
impl EmulatorService for InMemoryEmulatorService {
    async fn get_all_emulators(&self) -> Result<Vec<Emulator>, ServiceError> {
        Ok(self.emulators.read().await.clone())
    }

    async fn get_emulators_by_platform(&self, platform_id: i64) -> Result<Vec<Emulator>, ServiceError> {
        let emulators = self.emulators.read().await;
        Ok(emulators
            .iter()
            .filter(|e| e.platform_id == Some(platform_id))
            .cloned()
            .collect())
    }

    async fn get_emulator_by_id(&self, id: i64) -> Result<Option<Emulator>, ServiceError> {
        Ok(self.emulators.read().await.iter().find(|e| e.id == id).cloned())
    }

    async fn get_default_emulator_for_platform(&self, platform_id: i64) -> Result<Option<Emulator>, ServiceError> {
        let emulators = self.emulators.read().await;
        let candidates: Vec<&Emulator> = emulators
            .iter()
            .filter(|e| e.platform_id == Some(platform_id))
            .collect();
        Ok(candidates
            .iter()
            .find(|e| e.is_default)
            .or_else(|| candidates.first())
            .map(|e| (*e).clone()))
    }

    async fn add_emulator(&self, mut emulator: Emulator) -> Result<Emulator, ServiceError> {
        let mut emulators = self.emulators.write().await;
        if emulator.id == 0 {
            emulator.id = emulators.iter().map(|e| e.id).max().unwrap_or(0) + 1;
        }
        emulators.push(emulator.clone());
        Ok(emulator)
    }

    async fn update_emulator(&self, mut emulator: Emulator) -> Result<(), ServiceError> {
        let mut emulators = self.emulators.write().await;
        let slot = emulators
            .iter_mut()
            .find(|e| e.id == emulator.id)
            .ok_or(ServiceError::EmulatorNotFound(emulator.id))?;
        emulator.updated_at = Some(Utc::now());
        *slot = emulator;
        Ok(())
    }

    async fn delete_emulator(&self, id: i64) -> Result<(), ServiceError> {
        self.emulators.write().await.retain(|e| e.id != id);
        Ok(())
    }
}

/// Scraper that never finds anything
#[derive(Debug, Default)]
pub struct NullMediaScraper;

#[async_trait]
impl MediaScraperService for NullMediaScraper {
    async fn download_box_art(&self, _game: &Game) -> Result<bool, ServiceError> {
        Ok(false)
    }

    async fn download_screenshot(&self, _game: &Game) -> Result<bool, ServiceError> {
        Ok(false)
    }

    async fn download_background(&self, _game: &Game) -> Result<bool, ServiceError> {
        Ok(false)
    }

    async fn search_game_metadata(&self, _title: &str, _platform_id: i64) -> Result<Option<GameMetadata>, ServiceError> {
        Ok(None)
    }

    async fn update_game_metadata(&self, _game: &Game) -> Result<bool, ServiceError> {
        Ok(false)
    }
}

/// Terminal-backed notifications; blocks on stdin until the user answers
#[derive(Debug, Default)]
pub struct ConsoleInteraction;

impl ConsoleInteraction {
    fn prompt(&self, line: &str) -> String {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        let _ = write!(out, "{}", line);
        let _ = out.flush();

        let mut answer = String::new();
        let _ = std::io::stdin().lock().read_line(&mut answer);
        answer.trim().to_string()
    }
}

impl UserInteraction for ConsoleInteraction {
    fn show_message(&self, title: &str, message: &str) {
        self.prompt(&format!("[{}] {}\n(press Enter) ", title, message));
    }

    fn show_confirmation(&self, title: &str, message: &str) -> bool {
        let answer = self.prompt(&format!("[{}] {} [y/N] ", title, message));
        matches!(answer.to_lowercase().as_str(), "y" | "yes")
    }
}
