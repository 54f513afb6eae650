//! Game launch workflow.
//!
//! Resolves the emulator for a game, starts it, and drives the plugin event
//! hooks around the process: `on_game_launch` before the process starts and
//! `on_game_close` from a background task once it exits.

use super::{EmulatorService, GameLauncherService, GameLibraryService, ServiceError};
use crate::models::{Emulator, Game};
use crate::plugins::{DispatchReport, PluginManager};
use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, OnceLock, Weak};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Placeholder in an argument template that stands for the game path
pub const PATH_PLACEHOLDER: &str = "{0}";

/// Launches games and notifies plugins around the emulator process
pub struct GameLauncher {
    library: Arc<dyn GameLibraryService>,
    emulators: Arc<dyn EmulatorService>,
    // Weak: the manager's plugins reach this launcher through their contexts.
    plugin_manager: OnceLock<Weak<PluginManager>>,
}

impl GameLauncher {
    pub fn new(library: Arc<dyn GameLibraryService>, emulators: Arc<dyn EmulatorService>) -> Self {
        Self {
            library,
            emulators,
            plugin_manager: OnceLock::new(),
        }
    }

    /// Attach the manager whose plugins receive launch and close events.
    /// Only the first call has an effect.
    pub fn set_plugin_manager(&self, manager: &Arc<PluginManager>) {
        if self.plugin_manager.set(Arc::downgrade(manager)).is_err() {
            warn!("Plugin manager already attached to the game launcher");
        }
    }

    fn manager(&self) -> Option<Arc<PluginManager>> {
        self.plugin_manager.get().and_then(Weak::upgrade)
    }

    /// Launch `game` and return a handle to the exit monitor
    pub async fn launch_and_track(
        &self,
        game: &Game,
        emulator: Option<Emulator>,
    ) -> Result<LaunchHandle, ServiceError> {
        if !self.validate_game_file(game).await {
            return Err(ServiceError::GameFileMissing(game.file_path.clone()));
        }

        let emulator = self.resolve_emulator(game, emulator).await?;
        if !self.validate_emulator(&emulator).await {
            return Err(ServiceError::EmulatorMissing(emulator.executable_path.clone()));
        }

        let arguments = build_arguments(&emulator, &game.file_path)?;
        let mut command = Command::new(&emulator.executable_path);
        command.args(&arguments);
        if let Some(dir) = &emulator.working_directory {
            command.current_dir(dir);
        }

        let manager = self.manager();
        if let Some(manager) = &manager {
            let report = manager.dispatch_game_launch(game, &emulator).await;
            debug!(
                "on_game_launch reached {} plugins ({} failed)",
                report.invoked,
                report.failed.len()
            );
        }

        info!(
            "Launching {} with {} ({:?} {:?})",
            game.title, emulator.name, emulator.executable_path, arguments
        );
        let mut child = command
            .spawn()
            .map_err(|e| ServiceError::LaunchFailed(format!("{}: {}", emulator.name, e)))?;
        let pid = child.id();

        if let Err(e) = self.library.update_play_stats(game.id).await {
            warn!("Failed to update play stats for game {}: {}", game.id, e);
        }

        let weak_manager = manager.as_ref().map(Arc::downgrade);
        drop(manager);
        let closed_game = game.clone();
        let monitor = tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!("{} exited with {}", closed_game.title, status),
                Err(e) => error!("Failed to wait for {}: {}", closed_game.title, e),
            }

            // Resolved now so plugins toggled during the session are respected.
            let manager = weak_manager.as_ref().and_then(Weak::upgrade)?;
            Some(manager.dispatch_game_close(&closed_game).await)
        });

        Ok(LaunchHandle { pid, monitor })
    }

    /// Explicit emulator, else the game's preferred one, else the platform default
    async fn resolve_emulator(&self, game: &Game, explicit: Option<Emulator>) -> Result<Emulator, ServiceError> {
        if let Some(emulator) = explicit {
            return Ok(emulator);
        }

        if let Some(preferred_id) = game.preferred_emulator_id {
            match self.emulators.get_emulator_by_id(preferred_id).await? {
                Some(emulator) => return Ok(emulator),
                None => warn!(
                    "Preferred emulator {} for {} not found; using platform default",
                    preferred_id, game.title
                ),
            }
        }

        self.emulators
            .get_default_emulator_for_platform(game.platform_id)
            .await?
            .ok_or(ServiceError::NoEmulatorForPlatform(game.platform_id))
    }
}

#[async_trait]
impl GameLauncherService for GameLauncher {
    async fn launch_game(&self, game: &Game, emulator: Option<Emulator>) -> Result<bool, ServiceError> {
        // The exit monitor keeps running after its handle is dropped.
        self.launch_and_track(game, emulator).await.map(|_| true)
    }

    async fn validate_emulator(&self, emulator: &Emulator) -> bool {
        tokio::fs::metadata(&emulator.executable_path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    async fn validate_game_file(&self, game: &Game) -> bool {
        tokio::fs::metadata(&game.file_path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for GameLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameLauncher")
            .field("plugin_manager_attached", &self.manager().is_some())
            .finish()
    }
}

/// A running game
#[derive(Debug)]
pub struct LaunchHandle {
    pid: Option<u32>,
    monitor: JoinHandle<Option<DispatchReport>>,
}

impl LaunchHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Wait for the game to exit and the close round to finish.
    ///
    /// Returns `None` when no plugin manager was reachable, or when the
    /// monitor task itself failed.
    pub async fn wait(self) -> Option<DispatchReport> {
        match self.monitor.await {
            Ok(report) => report,
            Err(e) => {
                error!("Game exit monitor failed: {}", e);
                None
            }
        }
    }
}

/// Emulator arguments for `game_path`.
///
/// Without a template the path is the only argument. Otherwise every `{0}`
/// is replaced by the path, shell-quoted when the emulator asks for quotes,
/// and the result is split with shell rules.
pub fn build_arguments(emulator: &Emulator, game_path: &Path) -> Result<Vec<String>, ServiceError> {
    let path = game_path.to_string_lossy();
    let template = match emulator.command_line_arguments.as_deref().map(str::trim) {
        Some(template) if !template.is_empty() => template,
        _ => return Ok(vec![path.into_owned()]),
    };

    if !template.contains(PATH_PLACEHOLDER) {
        warn!(
            "Argument template for {} has no {} placeholder; the game path is not passed",
            emulator.name, PATH_PLACEHOLDER
        );
    }

    let substituted = if emulator.use_quotes_for_path {
        template.replace(PATH_PLACEHOLDER, &shell_words::quote(&path))
    } else {
        template.replace(PATH_PLACEHOLDER, &path)
    };
    shell_words::split(&substituted).map_err(|e| ServiceError::InvalidArguments(format!("{}: {}", template, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{InMemoryEmulatorService, InMemoryGameLibrary};
    use crate::testing::fixtures::{sample_emulator, sample_game};
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn launcher_with(emulators: Vec<Emulator>, games: Vec<Game>) -> GameLauncher {
        GameLauncher::new(
            Arc::new(InMemoryGameLibrary::with_games(games)),
            Arc::new(InMemoryEmulatorService::with_emulators(emulators)),
        )
    }

    #[test]
    fn test_arguments_without_template_are_the_path() {
        let emulator = Emulator::new(1, "mednafen", "/usr/bin/mednafen");
        let args = build_arguments(&emulator, Path::new("/roms/My Game.cue")).unwrap();
        assert_eq!(args, vec!["/roms/My Game.cue"]);
    }

    #[test]
    fn test_template_placeholder_is_replaced() {
        let emulator = Emulator::new(1, "retroarch", "/usr/bin/retroarch")
            .with_arguments("-L cores/snes9x.so --fullscreen {0}");
        let args = build_arguments(&emulator, Path::new("/roms/Super Metroid (USA).sfc")).unwrap();
        assert_eq!(
            args,
            vec!["-L", "cores/snes9x.so", "--fullscreen", "/roms/Super Metroid (USA).sfc"]
        );
    }

    #[test]
    fn test_unquoted_path_is_split_on_whitespace() {
        let mut emulator = Emulator::new(1, "dosbox", "/usr/bin/dosbox").with_arguments("{0} -exit");
        emulator.use_quotes_for_path = false;
        let args = build_arguments(&emulator, Path::new("/games/doom/doom.exe")).unwrap();
        assert_eq!(args, vec!["/games/doom/doom.exe", "-exit"]);

        let args = build_arguments(&emulator, Path::new("/games/my doom.exe")).unwrap();
        assert_eq!(args, vec!["/games/my", "doom.exe", "-exit"]);
    }

    #[test]
    fn test_unbalanced_template_is_rejected() {
        let emulator = Emulator::new(1, "broken", "/bin/true").with_arguments("--title \"oops {0}");
        assert!(matches!(
            build_arguments(&emulator, Path::new("/roms/a.bin")),
            Err(ServiceError::InvalidArguments(_))
        ));
    }

    #[tokio::test]
    async fn test_emulator_resolution_order() {
        let platform_default = Emulator::new(1, "default", "/bin/default").with_platform(1, true);
        let preferred = Emulator::new(2, "preferred", "/bin/preferred").with_platform(1, false);
        let launcher = launcher_with(vec![platform_default, preferred], Vec::new());

        let mut game = Game::new(1, "Chrono Trigger", "/roms/ct.sfc", 1);
        assert_eq!(launcher.resolve_emulator(&game, None).await.unwrap().id, 1);

        game.preferred_emulator_id = Some(2);
        assert_eq!(launcher.resolve_emulator(&game, None).await.unwrap().id, 2);

        game.preferred_emulator_id = Some(99);
        assert_eq!(launcher.resolve_emulator(&game, None).await.unwrap().id, 1);

        let explicit = Emulator::new(3, "explicit", "/bin/explicit");
        assert_eq!(launcher.resolve_emulator(&game, Some(explicit)).await.unwrap().id, 3);

        let orphan = Game::new(2, "Orphan", "/roms/orphan.bin", 5);
        assert!(matches!(
            launcher.resolve_emulator(&orphan, None).await,
            Err(ServiceError::NoEmulatorForPlatform(5))
        ));
    }

    #[tokio::test]
    async fn test_missing_files_are_reported() {
        let temp_dir = TempDir::new().unwrap();
        let launcher = launcher_with(Vec::new(), Vec::new());
        let game = sample_game(temp_dir.path());

        match launcher.launch_game(&game, None).await {
            Err(ServiceError::GameFileMissing(path)) => assert_eq!(path, game.file_path),
            other => panic!("expected missing game file, got {:?}", other),
        }

        std::fs::write(&game.file_path, b"rom").unwrap();
        let emulator = sample_emulator(temp_dir.path());
        assert!(matches!(
            launcher.launch_game(&game, Some(emulator)).await,
            Err(ServiceError::EmulatorMissing(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_updates_stats_without_plugins() {
        let temp_dir = TempDir::new().unwrap();
        let game = sample_game(temp_dir.path());
        std::fs::write(&game.file_path, b"rom").unwrap();
        let library = Arc::new(InMemoryGameLibrary::with_games(vec![game.clone()]));
        let launcher = GameLauncher::new(library.clone(), Arc::new(InMemoryEmulatorService::new()));

        let emulator = Emulator::new(1, "sh", PathBuf::from("/bin/sh")).with_arguments("-c true {0}");
        let handle = launcher.launch_and_track(&game, Some(emulator)).await.unwrap();
        assert!(handle.pid().is_some());
        assert!(handle.wait().await.is_none());

        let stored = library.get_game_by_id(game.id).await.unwrap().unwrap();
        assert_eq!(stored.play_count, 1);
        assert!(stored.last_played_at.is_some());
    }
}
