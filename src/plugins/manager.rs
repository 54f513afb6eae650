//! Plugin Manager
//!
//! Owns the table of registered plugins and drives their lifecycle: scanning
//! the plugin directory, loading modules into isolation units, dispatching
//! hooks in registration order, toggling the enabled gate, and selective
//! reload and unload.
//!
//! Every state-mutating operation holds the manager's operation lock for its
//! whole duration, hooks included, so `reload`, `set_enabled`, `load_all` and
//! `unload_all` never interleave. The record table itself is only locked
//! briefly and never while a hook is awaited, so dispatch rounds and lookups
//! from inside a hook cannot deadlock.

use crate::models::{Emulator, Game};
use crate::plugins::loader::panic_message;
use crate::plugins::{
    HookKind, IsolationUnit, ModuleLoader, NativeModuleLoader, PluginContext, PluginDescriptor,
    PluginError, PluginEvent, PluginInfo, PluginInstance, PluginState, PluginSystemConfig,
};
use crate::services::ServiceRegistry;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde::Serialize;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};
use walkdir::WalkDir;

/// Binds one live plugin instance to its runtime state
struct PluginRecord {
    instance: Arc<PluginInstance>,
    context: Arc<PluginContext>,
    source_path: PathBuf,
    unit: IsolationUnit,
    enabled: bool,
    loaded_at: DateTime<Utc>,
}

impl PluginRecord {
    fn id(&self) -> &str {
        &self.instance.descriptor().id
    }

    fn info(&self) -> PluginInfo {
        PluginInfo {
            descriptor: self.instance.descriptor().clone(),
            kind: self.instance.kind(),
            state: if self.enabled {
                PluginState::Enabled
            } else {
                PluginState::Disabled
            },
            source_path: self.source_path.clone(),
            type_name: self.instance.type_name().to_string(),
            loaded_at: self.loaded_at,
        }
    }
}

/// A module or plugin type that failed during a scan
#[derive(Debug)]
pub struct LoadFailure {
    pub path: PathBuf,
    pub error: PluginError,
}

/// Outcome of [`PluginManager::load_all`]
#[derive(Debug, Default)]
pub struct LoadSummary {
    pub modules_found: usize,
    pub plugins_loaded: usize,
    pub failures: Vec<LoadFailure>,
}

/// Outcome of one dispatch round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Number of plugins the hook was called on
    pub invoked: usize,
    /// IDs of plugins whose hook failed, timed out, or panicked
    pub failed: Vec<String>,
}

impl DispatchReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Plugin manager runtime statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct PluginManagerStats {
    pub registered_plugins: usize,
    pub enabled_plugins: usize,
    pub modules_found: usize,
    pub failed_loads: usize,
    pub hook_invocations: u64,
    pub hook_failures: u64,
    pub reloads: u64,
    pub last_scan_duration: Option<Duration>,
}

/// How a single-module load treats plugin IDs that are already registered
#[derive(Debug, Clone, Copy)]
enum LoadMode<'a> {
    /// Registering an ID twice is a failure
    Fresh,
    /// Re-registering `id`; siblings that are still registered are skipped
    Reload(&'a str),
}

struct ModuleLoad {
    registered: Vec<String>,
    failures: Vec<PluginError>,
}

/// Plugin Manager responsible for plugin lifecycle management
pub struct PluginManager {
    config: PluginSystemConfig,
    services: Arc<ServiceRegistry>,
    loader: Arc<dyn ModuleLoader>,
    /// Registered plugins in registration order
    records: RwLock<Vec<PluginRecord>>,
    /// Serializes load_all, load_module, unload_all, reload and set_enabled
    op_lock: Mutex<()>,
    hook_timeout: Option<Duration>,
    event_sender: broadcast::Sender<PluginEvent>,
    stats: RwLock<PluginManagerStats>,
}

impl PluginManager {
    /// Create a manager, creating the plugin directory if needed
    pub async fn new(
        config: PluginSystemConfig,
        services: Arc<ServiceRegistry>,
        loader: Arc<dyn ModuleLoader>,
    ) -> Result<Self, PluginError> {
        if !config.plugin_dir.exists() {
            tokio::fs::create_dir_all(&config.plugin_dir).await?;
        }
        let (event_sender, _) = broadcast::channel(256);

        Ok(Self {
            hook_timeout: config.hook_timeout(),
            config,
            services,
            loader,
            records: RwLock::new(Vec::new()),
            op_lock: Mutex::new(()),
            event_sender,
            stats: RwLock::new(PluginManagerStats::default()),
        })
    }

    /// Create a manager that loads native shared libraries
    pub async fn with_native_loader(
        config: PluginSystemConfig,
        services: Arc<ServiceRegistry>,
    ) -> Result<Self, PluginError> {
        Self::new(config, services, Arc::new(NativeModuleLoader::new())).await
    }

    /// Override the per-hook timeout from the configuration
    pub fn with_hook_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.hook_timeout = timeout;
        self
    }

    pub fn config(&self) -> &PluginSystemConfig {
        &self.config
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.config.plugin_dir
    }

    /// Whether `path` is a module file the configured loader understands
    pub fn is_candidate(&self, path: &Path) -> bool {
        self.loader.can_load(path)
    }

    /// Load every module under the plugin directory, then run `on_startup`
    /// on the plugins this scan registered that are still enabled.
    ///
    /// Never fails; per-module and per-type failures are logged and listed
    /// in the returned summary. Plugin IDs that are already registered are
    /// rejected, so a repeated call does not duplicate registrations.
    pub async fn load_all(&self) -> LoadSummary {
        let _op = self.op_lock.lock().await;
        let start_time = Instant::now();
        info!("Scanning for plugins in: {:?}", self.config.plugin_dir);

        let modules = self.discover_modules();
        let mut summary = LoadSummary {
            modules_found: modules.len(),
            ..LoadSummary::default()
        };
        let mut registered = Vec::new();

        for path in modules {
            match self.load_module_locked(&path, LoadMode::Fresh).await {
                Ok(outcome) => {
                    summary.plugins_loaded += outcome.registered.len();
                    registered.extend(outcome.registered);
                    summary.failures.extend(outcome.failures.into_iter().map(|error| LoadFailure {
                        path: path.clone(),
                        error,
                    }));
                }
                Err(error) => {
                    error!("Failed to load plugin module {:?}: {}", path, error);
                    let _ = self.event_sender.send(PluginEvent::ModuleFailed {
                        path: path.clone(),
                        error: error.to_string(),
                    });
                    summary.failures.push(LoadFailure { path, error });
                }
            }
        }

        // Earlier registrations are not revisited.
        for plugin_id in &registered {
            if let Some(instance) = self.get_plugin(plugin_id).await {
                let _ = self.invoke(&instance, HookKind::Startup, instance.on_startup()).await;
            }
        }

        {
            let mut stats = self.stats.write().await;
            stats.modules_found = summary.modules_found;
            stats.failed_loads = summary.failures.len();
            stats.last_scan_duration = Some(start_time.elapsed());
        }

        info!(
            "Plugin scan complete: {} modules, {} plugins loaded, {} failures in {:?}",
            summary.modules_found,
            summary.plugins_loaded,
            summary.failures.len(),
            start_time.elapsed()
        );
        summary
    }

    /// Load a single module outside a full scan. Does not run `on_startup`.
    ///
    /// Returns the IDs registered from the module. Fails when the module
    /// cannot be loaded, or when it offered plugin types but none of them
    /// could be registered.
    pub async fn load_module(&self, path: &Path) -> Result<Vec<String>, PluginError> {
        let _op = self.op_lock.lock().await;
        let outcome = self.load_module_locked(path, LoadMode::Fresh).await?;
        match (outcome.registered.is_empty(), outcome.failures.into_iter().next()) {
            (true, Some(error)) => Err(error),
            _ => Ok(outcome.registered),
        }
    }

    /// Call `on_shutdown` then `on_unload` on every registered plugin,
    /// enabled or not, and release its isolation unit. The table ends up
    /// empty regardless of individual failures.
    pub async fn unload_all(&self) {
        let _op = self.op_lock.lock().await;
        let records = std::mem::take(&mut *self.records.write().await);
        if records.is_empty() {
            debug!("No plugins to unload");
            return;
        }

        info!("Unloading {} plugins", records.len());
        for record in records {
            let _ = self
                .invoke(&record.instance, HookKind::Shutdown, record.instance.on_shutdown())
                .await;
            let plugin_id = record.id().to_string();
            self.release(record).await;
            let _ = self.event_sender.send(PluginEvent::PluginUnloaded { plugin_id });
        }
        info!("All plugins unloaded");
    }

    /// Replace a registered plugin with a fresh instance from the same
    /// module file.
    ///
    /// The old instance gets `on_unload` and its unit share is released
    /// before the module is loaded again. The new record is appended to the
    /// registration order, starts enabled, and does not get `on_startup`.
    /// Other plugins from the same module keep their current instance.
    pub async fn reload(&self, plugin_id: &str) -> Result<(), PluginError> {
        let _op = self.op_lock.lock().await;

        let record = {
            let mut records = self.records.write().await;
            let index = records
                .iter()
                .position(|r| r.id() == plugin_id)
                .ok_or_else(|| PluginError::NotFound(plugin_id.to_string()))?;
            records.remove(index)
        };

        info!("Reloading plugin {} from {:?}", plugin_id, record.source_path);
        let source_path = record.source_path.clone();
        self.release(record).await;

        let outcome = self
            .load_module_locked(&source_path, LoadMode::Reload(plugin_id))
            .await?;
        if !outcome.registered.iter().any(|id| id == plugin_id) {
            return Err(outcome.failures.into_iter().next().unwrap_or_else(|| {
                PluginError::LoadFailed(format!(
                    "{:?} no longer provides plugin {}",
                    source_path, plugin_id
                ))
            }));
        }

        let version = self
            .registered_plugin(plugin_id)
            .await
            .map(|p| p.descriptor().version.clone())
            .unwrap_or_default();
        self.stats.write().await.reloads += 1;
        let _ = self.event_sender.send(PluginEvent::PluginReloaded {
            plugin_id: plugin_id.to_string(),
            version,
        });
        info!("Plugin {} reloaded", plugin_id);
        Ok(())
    }

    /// Flip the enabled gate without calling any lifecycle hook.
    ///
    /// Returns `false` when no plugin with `plugin_id` is registered.
    pub async fn set_enabled(&self, plugin_id: &str, enabled: bool) -> bool {
        let _op = self.op_lock.lock().await;
        let mut records = self.records.write().await;
        let Some(record) = records.iter_mut().find(|r| r.id() == plugin_id) else {
            warn!("Cannot change state of unknown plugin {}", plugin_id);
            return false;
        };

        if record.enabled != enabled {
            record.enabled = enabled;
            info!(
                "Plugin {} {}",
                plugin_id,
                if enabled { "enabled" } else { "disabled" }
            );
            let _ = self.event_sender.send(PluginEvent::PluginEnabledChanged {
                plugin_id: plugin_id.to_string(),
                enabled,
            });
            self.transition(
                plugin_id,
                if enabled { PluginState::Enabled } else { PluginState::Disabled },
            );
        }
        true
    }

    /// Enabled plugins in registration order
    pub async fn get_loaded_plugins(&self) -> Vec<Arc<PluginInstance>> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.enabled)
            .map(|r| Arc::clone(&r.instance))
            .collect()
    }

    /// The enabled plugin with `plugin_id`
    pub async fn get_plugin(&self, plugin_id: &str) -> Option<Arc<PluginInstance>> {
        self.records
            .read()
            .await
            .iter()
            .find(|r| r.enabled && r.id() == plugin_id)
            .map(|r| Arc::clone(&r.instance))
    }

    /// Enabled plugins that also provide the emulator-extension capability
    pub async fn get_emulator_plugins(&self) -> Vec<Arc<PluginInstance>> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.enabled && r.instance.as_emulator_plugin().is_some())
            .map(|r| Arc::clone(&r.instance))
            .collect()
    }

    /// Registered plugin with `plugin_id`, ignoring the enabled gate
    pub async fn registered_plugin(&self, plugin_id: &str) -> Option<Arc<PluginInstance>> {
        self.records
            .read()
            .await
            .iter()
            .find(|r| r.id() == plugin_id)
            .map(|r| Arc::clone(&r.instance))
    }

    /// Context handed to the registered plugin `plugin_id`
    pub async fn plugin_context(&self, plugin_id: &str) -> Option<Arc<PluginContext>> {
        self.records
            .read()
            .await
            .iter()
            .find(|r| r.id() == plugin_id)
            .map(|r| Arc::clone(&r.context))
    }

    /// Snapshot of every registered plugin, enabled or not
    pub async fn list_plugins(&self) -> Vec<PluginInfo> {
        self.records.read().await.iter().map(PluginRecord::info).collect()
    }

    /// IDs of registered plugins loaded from the module at `path`
    pub async fn plugins_from_source(&self, path: &Path) -> Vec<String> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.source_path == path)
            .map(|r| r.id().to_string())
            .collect()
    }

    /// Run `on_game_launch` on every enabled plugin, one after another
    pub async fn dispatch_game_launch(&self, game: &Game, emulator: &Emulator) -> DispatchReport {
        let mut report = DispatchReport::default();
        for instance in self.get_loaded_plugins().await {
            report.invoked += 1;
            if self
                .invoke(&instance, HookKind::GameLaunch, instance.on_game_launch(game, emulator))
                .await
                .is_err()
            {
                report.failed.push(instance.descriptor().id.clone());
            }
        }
        report
    }

    /// Run `on_game_close` on every enabled plugin, one after another
    pub async fn dispatch_game_close(&self, game: &Game) -> DispatchReport {
        let mut report = DispatchReport::default();
        for instance in self.get_loaded_plugins().await {
            report.invoked += 1;
            if self
                .invoke(&instance, HookKind::GameClose, instance.on_game_close(game))
                .await
                .is_err()
            {
                report.failed.push(instance.descriptor().id.clone());
            }
        }
        report
    }

    /// Subscribe to plugin events
    pub fn subscribe_events(&self) -> broadcast::Receiver<PluginEvent> {
        self.event_sender.subscribe()
    }

    /// Get plugin manager statistics
    pub async fn stats(&self) -> PluginManagerStats {
        let mut stats = self.stats.read().await.clone();
        let records = self.records.read().await;
        stats.registered_plugins = records.len();
        stats.enabled_plugins = records.iter().filter(|r| r.enabled).count();
        stats
    }

    /// Candidate module files under the plugin directory, sorted by path
    fn discover_modules(&self) -> Vec<PathBuf> {
        if !self.config.plugin_dir.is_dir() {
            warn!("Plugin directory {:?} does not exist", self.config.plugin_dir);
            return Vec::new();
        }

        let mut modules: Vec<PathBuf> = WalkDir::new(&self.config.plugin_dir)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable plugin directory entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| self.loader.can_load(path))
            .collect();
        modules.sort();
        debug!("Discovered {} candidate plugin modules", modules.len());
        modules
    }

    /// Load one module and register every plugin type it offers.
    ///
    /// Caller must hold the operation lock.
    async fn load_module_locked(&self, path: &Path, mode: LoadMode<'_>) -> Result<ModuleLoad, PluginError> {
        debug!("Loading plugin module: {:?}", path);
        let mut unit = self.loader.load_module(path).await?;
        let mut outcome = ModuleLoad {
            registered: Vec::new(),
            failures: Vec::new(),
        };

        if unit.find_contract_types().is_empty() {
            warn!("Module {:?} does not register any plugin types", path);
        }

        for factory in unit.find_contract_types() {
            let instance = match unit.instantiate(factory) {
                Ok(instance) => instance,
                Err(e) => {
                    error!("Skipping plugin type {} in {:?}: {}", factory.type_name(), path, e);
                    outcome.failures.push(e);
                    continue;
                }
            };
            let descriptor = instance.descriptor().clone();

            if self.registered_plugin(&descriptor.id).await.is_some() {
                match mode {
                    LoadMode::Reload(target) if target != descriptor.id => {
                        debug!("Keeping current instance of sibling plugin {}", descriptor.id);
                    }
                    _ => {
                        error!("Plugin {} from {:?} is already registered", descriptor.id, path);
                        outcome.failures.push(PluginError::DuplicatePlugin(descriptor.id));
                    }
                }
                continue;
            }

            match self.register(&unit, path, instance, &descriptor).await {
                Ok(()) => outcome.registered.push(descriptor.id),
                Err(e) => outcome.failures.push(e),
            }
        }

        // Registered plugins hold their own shares; this releases the
        // factories and, if nothing was registered, the module itself.
        unit.unload();
        Ok(outcome)
    }

    async fn register(
        &self,
        unit: &IsolationUnit,
        path: &Path,
        instance: Arc<PluginInstance>,
        descriptor: &PluginDescriptor,
    ) -> Result<(), PluginError> {
        if descriptor.semver().is_none() {
            warn!(
                "Plugin {} reports a non-semver version '{}'",
                descriptor.id, descriptor.version
            );
        }

        self.transition(&descriptor.id, PluginState::Discovered);
        let context = Arc::new(PluginContext::new(
            &descriptor.id,
            Arc::clone(&self.services),
            &self.config.data_root,
        ));
        self.invoke(&instance, HookKind::Load, instance.on_load(Arc::clone(&context)))
            .await?;
        self.transition(&descriptor.id, PluginState::Loaded);

        self.records.write().await.push(PluginRecord {
            instance,
            context,
            source_path: path.to_path_buf(),
            unit: unit.retain(),
            enabled: true,
            loaded_at: Utc::now(),
        });

        info!(
            "Loaded plugin {} v{} by {}",
            descriptor.id, descriptor.version, descriptor.author
        );
        let _ = self.event_sender.send(PluginEvent::PluginLoaded {
            plugin_id: descriptor.id.clone(),
            version: descriptor.version.clone(),
        });
        self.transition(&descriptor.id, PluginState::Enabled);
        Ok(())
    }

    /// Run `on_unload` and give up the record's share of its module
    async fn release(&self, record: PluginRecord) {
        let PluginRecord {
            instance,
            context,
            mut unit,
            ..
        } = record;
        let plugin_id = instance.descriptor().id.clone();

        let _ = self.invoke(&instance, HookKind::Unload, instance.on_unload()).await;
        drop(context);
        drop(instance);

        if unit.unload() {
            debug!("Module for plugin {} released", plugin_id);
        } else {
            debug!("Module for plugin {} still in use; release deferred", plugin_id);
        }
        self.transition(&plugin_id, PluginState::Unloaded);
    }

    fn transition(&self, plugin_id: &str, state: PluginState) {
        trace!("Plugin {} is now {:?}", plugin_id, state);
        let _ = self.event_sender.send(PluginEvent::StateChanged {
            plugin_id: plugin_id.to_string(),
            state,
        });
    }

    /// Await one hook call, bounded by the hook timeout and with panics
    /// caught. Failures are logged, counted and broadcast before being
    /// returned.
    async fn invoke<F>(&self, instance: &PluginInstance, hook: HookKind, call: F) -> Result<(), PluginError>
    where
        F: Future<Output = Result<(), PluginError>>,
    {
        let plugin_id = instance.descriptor().id.as_str();
        let guarded = AssertUnwindSafe(call).catch_unwind();

        let result = match self.hook_timeout {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(outcome) => settle(plugin_id, hook, outcome),
                Err(_) => Err(PluginError::HookTimedOut {
                    plugin_id: plugin_id.to_string(),
                    hook,
                    timeout_ms: limit.as_millis() as u64,
                }),
            },
            None => settle(plugin_id, hook, guarded.await),
        };

        let mut stats = self.stats.write().await;
        stats.hook_invocations += 1;
        if let Err(e) = &result {
            stats.hook_failures += 1;
            error!("{}", e);
            let _ = self.event_sender.send(PluginEvent::HookFailed {
                plugin_id: plugin_id.to_string(),
                hook,
                error: e.to_string(),
            });
        }
        result
    }
}

fn settle(
    plugin_id: &str,
    hook: HookKind,
    outcome: Result<Result<(), PluginError>, Box<dyn std::any::Any + Send>>,
) -> Result<(), PluginError> {
    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(PluginError::HookFailed {
            plugin_id: plugin_id.to_string(),
            hook,
            reason: e.to_string(),
        }),
        Err(payload) => Err(PluginError::HookFailed {
            plugin_id: plugin_id.to_string(),
            hook,
            reason: format!("panicked: {}", panic_message(payload.as_ref())),
        }),
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("config", &self.config)
            .field("loader", &"<ModuleLoader trait object>")
            .field("hook_timeout", &self.hook_timeout)
            .finish()
    }
}
