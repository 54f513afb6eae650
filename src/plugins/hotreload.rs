//! Plugin Hot Reload System
//!
//! Watches the plugin directory and reloads modules whose files change.
//! Events are debounced per path, and a content digest filters out writes
//! that leave the module bytes unchanged. A changed module reloads every
//! plugin registered from it; a new module file is loaded fresh.

use crate::plugins::{PluginError, PluginManager, PluginSystemConfig};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Hot reload configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HotReloadConfig {
    pub enabled: bool,
    /// Quiet period after the last event on a path before it is reloaded
    pub debounce_ms: u64,
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 500,
        }
    }
}

impl From<&PluginSystemConfig> for HotReloadConfig {
    fn from(config: &PluginSystemConfig) -> Self {
        Self {
            enabled: config.hot_reload,
            debounce_ms: config.debounce_ms,
        }
    }
}

/// What a module change led to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// File bytes match the last seen version
    Unchanged,
    /// File is gone or not a module
    Ignored,
    /// New module; these plugins were registered
    Loaded(Vec<String>),
    /// Known module; these plugins were reloaded
    Reloaded(Vec<String>),
}

/// Applies module changes to the manager
#[derive(Clone)]
struct ReloadWorker {
    manager: Arc<PluginManager>,
    digests: Arc<Mutex<HashMap<PathBuf, md5::Digest>>>,
}

impl ReloadWorker {
    async fn digest(path: &Path) -> Option<md5::Digest> {
        tokio::fs::read(path).await.ok().map(md5::compute)
    }

    /// Remember the current bytes of every module already on disk
    async fn seed(&self) {
        let modules: Vec<PathBuf> = WalkDir::new(self.manager.plugin_dir())
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| self.manager.is_candidate(path))
            .collect();

        let mut digests = self.digests.lock().await;
        for path in modules {
            if let Some(digest) = Self::digest(&path).await {
                digests.insert(path, digest);
            }
        }
        debug!("Tracking {} plugin modules for hot reload", digests.len());
    }

    async fn apply(&self, path: &Path) -> Result<ReloadOutcome, PluginError> {
        if !self.manager.is_candidate(path) {
            return Ok(ReloadOutcome::Ignored);
        }
        let Some(digest) = Self::digest(path).await else {
            debug!("Module {:?} disappeared before reload", path);
            self.digests.lock().await.remove(path);
            return Ok(ReloadOutcome::Ignored);
        };

        {
            let mut digests = self.digests.lock().await;
            if digests.get(path) == Some(&digest) {
                return Ok(ReloadOutcome::Unchanged);
            }
            digests.insert(path.to_path_buf(), digest);
        }

        let plugin_ids = self.manager.plugins_from_source(path).await;
        if plugin_ids.is_empty() {
            info!("Loading new plugin module {:?}", path);
            let loaded = self.manager.load_module(path).await?;
            return Ok(ReloadOutcome::Loaded(loaded));
        }

        let mut reloaded = Vec::new();
        let mut first_error = None;
        for plugin_id in plugin_ids {
            match self.manager.reload(&plugin_id).await {
                Ok(()) => reloaded.push(plugin_id),
                Err(e) => {
                    error!("Hot reload of plugin {} failed: {}", plugin_id, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) if reloaded.is_empty() => Err(e),
            _ => Ok(ReloadOutcome::Reloaded(reloaded)),
        }
    }
}

/// Plugin hot reload manager
pub struct PluginHotReloader {
    config: HotReloadConfig,
    worker: ReloadWorker,
    watcher: Option<RecommendedWatcher>,
    task: Option<JoinHandle<()>>,
}

impl PluginHotReloader {
    pub fn new(config: HotReloadConfig, manager: Arc<PluginManager>) -> Self {
        Self {
            config,
            worker: ReloadWorker {
                manager,
                digests: Arc::new(Mutex::new(HashMap::new())),
            },
            watcher: None,
            task: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }

    /// Start watching the plugin directory
    pub async fn start(&mut self) -> Result<(), PluginError> {
        if !self.config.enabled {
            info!("Hot reload is disabled");
            return Ok(());
        }
        if self.is_running() {
            return Ok(());
        }

        self.worker.seed().await;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                if tx.send(res).is_err() {
                    debug!("Hot reload loop stopped; dropping file event");
                }
            },
            Config::default(),
        )
        .map_err(|e| PluginError::IoError(format!("Failed to create file watcher: {}", e)))?;

        let plugin_dir = self.worker.manager.plugin_dir().to_path_buf();
        watcher
            .watch(&plugin_dir, RecursiveMode::Recursive)
            .map_err(|e| PluginError::IoError(format!("Failed to watch {:?}: {}", plugin_dir, e)))?;

        let debounce = Duration::from_millis(self.config.debounce_ms);
        self.task = Some(tokio::spawn(Self::watch_loop(rx, self.worker.clone(), debounce)));
        self.watcher = Some(watcher);

        info!("Watching {:?} for plugin changes", plugin_dir);
        Ok(())
    }

    /// Stop watching; changes still waiting out their debounce are dropped
    pub fn stop(&mut self) {
        self.watcher = None;
        if let Some(task) = self.task.take() {
            task.abort();
            info!("Plugin hot reload stopped");
        }
    }

    async fn watch_loop(
        mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
        worker: ReloadWorker,
        debounce: Duration,
    ) {
        let mut pending: HashMap<PathBuf, Instant> = HashMap::new();
        let mut tick = tokio::time::interval((debounce / 2).max(Duration::from_millis(10)));

        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Some(Ok(event)) => {
                        if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                            for path in event.paths {
                                pending.insert(path, Instant::now());
                            }
                        }
                    }
                    Some(Err(e)) => error!("File watch error: {}", e),
                    None => break,
                },
                _ = tick.tick() => {
                    let ready: Vec<PathBuf> = pending
                        .iter()
                        .filter(|(_, seen)| seen.elapsed() >= debounce)
                        .map(|(path, _)| path.clone())
                        .collect();
                    for path in ready {
                        pending.remove(&path);
                        match worker.apply(&path).await {
                            Ok(ReloadOutcome::Loaded(ids)) => info!("Hot-loaded {:?}: {:?}", path, ids),
                            Ok(ReloadOutcome::Reloaded(ids)) => info!("Hot-reloaded {:?}: {:?}", path, ids),
                            Ok(_) => {}
                            Err(e) => warn!("Hot reload of {:?} failed: {}", path, e),
                        }
                    }
                }
            }
        }
    }
}

impl Drop for PluginHotReloader {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for PluginHotReloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHotReloader")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::loader::constructor;
    use crate::plugins::{InProcessModuleLoader, PluginEvent};
    use crate::testing::fixtures::{manager_config, module_file, test_services};
    use crate::testing::mocks::{EventJournal, RecordingPlugin};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    async fn setup(temp_dir: &TempDir, journal: &EventJournal) -> Arc<PluginManager> {
        let old = journal.clone();
        let new = journal.clone();
        let loader = InProcessModuleLoader::new()
            .with_module("old.plugin", move |registrar| {
                let j = old.clone();
                registrar.register_plugin("Old", constructor(move || RecordingPlugin::new("old", j.clone())));
            })
            .with_module("new.plugin", move |registrar| {
                let j = new.clone();
                registrar.register_plugin("New", constructor(move || RecordingPlugin::new("new", j.clone())));
            });
        let manager = PluginManager::new(manager_config(temp_dir.path()), test_services(), Arc::new(loader))
            .await
            .unwrap();
        Arc::new(manager)
    }

    fn worker(manager: &Arc<PluginManager>) -> ReloadWorker {
        ReloadWorker {
            manager: Arc::clone(manager),
            digests: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[tokio::test]
    async fn test_changed_module_is_reloaded_and_unchanged_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let journal = EventJournal::default();
        let path = module_file(&temp_dir.path().join("Plugins"), "old.plugin");
        let manager = setup(&temp_dir, &journal).await;
        manager.load_all().await;
        let worker = worker(&manager);
        worker.seed().await;

        assert_eq!(worker.apply(&path).await.unwrap(), ReloadOutcome::Unchanged);

        std::fs::write(&path, b"module v2").unwrap();
        assert_eq!(
            worker.apply(&path).await.unwrap(),
            ReloadOutcome::Reloaded(vec!["old".to_string()])
        );
        assert_eq!(journal.count("old", crate::plugins::HookKind::Load), 2);
        assert_eq!(worker.apply(&path).await.unwrap(), ReloadOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_new_module_is_loaded_and_others_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let journal = EventJournal::default();
        let manager = setup(&temp_dir, &journal).await;
        let worker = worker(&manager);
        let plugin_dir = temp_dir.path().join("Plugins");

        let path = module_file(&plugin_dir, "new.plugin");
        assert_eq!(
            worker.apply(&path).await.unwrap(),
            ReloadOutcome::Loaded(vec!["new".to_string()])
        );
        assert!(manager.get_plugin("new").await.is_some());

        let readme = module_file(&plugin_dir, "README.md");
        assert_eq!(worker.apply(&readme).await.unwrap(), ReloadOutcome::Ignored);
        assert_eq!(
            worker.apply(&plugin_dir.join("gone.plugin")).await.unwrap(),
            ReloadOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn test_watcher_picks_up_new_module() {
        let temp_dir = TempDir::new().unwrap();
        let journal = EventJournal::default();
        let manager = setup(&temp_dir, &journal).await;
        let mut events = manager.subscribe_events();

        let mut reloader = PluginHotReloader::new(
            HotReloadConfig {
                enabled: true,
                debounce_ms: 50,
            },
            Arc::clone(&manager),
        );
        reloader.start().await.unwrap();
        assert!(reloader.is_running());

        module_file(&temp_dir.path().join("Plugins"), "new.plugin");
        let loaded = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if let Ok(PluginEvent::PluginLoaded { plugin_id, .. }) = events.recv().await {
                    return plugin_id;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(loaded, "new");

        reloader.stop();
        assert!(!reloader.is_running());
    }

    #[tokio::test]
    async fn test_disabled_reloader_does_not_watch() {
        let temp_dir = TempDir::new().unwrap();
        let manager = setup(&temp_dir, &EventJournal::default()).await;
        let mut reloader = PluginHotReloader::new(
            HotReloadConfig {
                enabled: false,
                debounce_ms: 50,
            },
            manager,
        );
        reloader.start().await.unwrap();
        assert!(!reloader.is_running());
    }
}
