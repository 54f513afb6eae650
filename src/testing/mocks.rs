//! Test doubles for the plugin runtime.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::models::{Emulator, Game};
use crate::plugins::{EmulatorPlugin, HookKind, LaunchdeckPlugin, PluginContext, PluginError};

static NEXT_SERIAL: AtomicUsize = AtomicUsize::new(1);

/// One hook call observed by an [`EventJournal`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookCall {
    pub plugin_id: String,
    /// Distinguishes instances of the same plugin across reloads
    pub serial: usize,
    pub hook: HookKind,
}

#[derive(Debug, Default)]
struct JournalState {
    calls: Vec<HookCall>,
    in_flight: usize,
    max_in_flight: usize,
}

/// Shared, ordered log of hook calls across any number of plugins
#[derive(Debug, Clone, Default)]
pub struct EventJournal {
    state: Arc<Mutex<JournalState>>,
}

impl EventJournal {
    fn enter(&self, plugin_id: &str, serial: usize, hook: HookKind) -> InFlight {
        let mut state = self.state.lock().unwrap();
        state.calls.push(HookCall {
            plugin_id: plugin_id.to_string(),
            serial,
            hook,
        });
        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);
        InFlight {
            journal: self.clone(),
        }
    }

    pub fn calls(&self) -> Vec<HookCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Hooks called on `plugin_id`, in order
    pub fn hooks(&self, plugin_id: &str) -> Vec<HookKind> {
        self.calls()
            .into_iter()
            .filter(|c| c.plugin_id == plugin_id)
            .map(|c| c.hook)
            .collect()
    }

    pub fn count(&self, plugin_id: &str, hook: HookKind) -> usize {
        self.hooks(plugin_id).into_iter().filter(|h| *h == hook).count()
    }

    /// Plugin IDs that received `hook`, in call order
    pub fn order(&self, hook: HookKind) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.hook == hook)
            .map(|c| c.plugin_id)
            .collect()
    }

    /// Instance serials that received `hook` for `plugin_id`
    pub fn serials(&self, plugin_id: &str, hook: HookKind) -> Vec<usize> {
        self.calls()
            .into_iter()
            .filter(|c| c.plugin_id == plugin_id && c.hook == hook)
            .map(|c| c.serial)
            .collect()
    }

    /// Most hooks ever running at the same time
    pub fn max_concurrency(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }
}

/// Marks a hook as running until dropped, including when the hook future
/// is cancelled by a timeout
struct InFlight {
    journal: EventJournal,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Ok(mut state) = self.journal.state.lock() {
            state.in_flight -= 1;
        }
    }
}

/// Plugin that records every hook call and can be told to misbehave
pub struct RecordingPlugin {
    id: String,
    version: String,
    serial: usize,
    journal: EventJournal,
    failing: HashSet<HookKind>,
    panicking: HashSet<HookKind>,
    delay: Option<Duration>,
    emulator_ids: Option<Option<Vec<i64>>>,
    context: Mutex<Option<Arc<PluginContext>>>,
}

impl RecordingPlugin {
    pub fn new(id: &str, journal: EventJournal) -> Self {
        Self {
            id: id.to_string(),
            version: "1.0.0".to_string(),
            serial: NEXT_SERIAL.fetch_add(1, Ordering::SeqCst),
            journal,
            failing: HashSet::new(),
            panicking: HashSet::new(),
            delay: None,
            emulator_ids: None,
            context: Mutex::new(None),
        }
    }

    pub fn failing_on(mut self, hook: HookKind) -> Self {
        self.failing.insert(hook);
        self
    }

    pub fn panicking_on(mut self, hook: HookKind) -> Self {
        self.panicking.insert(hook);
        self
    }

    /// Sleep this long inside every hook
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    /// Also act as an emulator plugin for `ids` (`None` = all emulators)
    pub fn with_emulator_support(mut self, ids: Option<Vec<i64>>) -> Self {
        self.emulator_ids = Some(ids);
        self
    }

    async fn record(&self, hook: HookKind) -> Result<(), PluginError> {
        let _running = self.journal.enter(&self.id, self.serial, hook);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panicking.contains(&hook) {
            panic!("{} panicked in {}", self.id, hook);
        }
        if self.failing.contains(&hook) {
            return Err(PluginError::ExecutionFailed(format!("{} refused {}", self.id, hook)));
        }
        Ok(())
    }
}

#[async_trait]
impl LaunchdeckPlugin for RecordingPlugin {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "Recording Plugin"
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn author(&self) -> &str {
        "launchdeck tests"
    }

    fn description(&self) -> &str {
        "Records every hook call"
    }

    async fn on_load(&self, context: Arc<PluginContext>) -> Result<(), PluginError> {
        self.record(HookKind::Load).await?;
        let loads = context.get_setting("loads", 0i64);
        context.set_setting("loads", loads + 1);
        *self.context.lock().unwrap() = Some(context);
        Ok(())
    }

    async fn on_unload(&self) -> Result<(), PluginError> {
        self.context.lock().unwrap().take();
        self.record(HookKind::Unload).await
    }

    async fn on_startup(&self) -> Result<(), PluginError> {
        self.record(HookKind::Startup).await
    }

    async fn on_game_launch(&self, _game: &Game, _emulator: &Emulator) -> Result<(), PluginError> {
        self.record(HookKind::GameLaunch).await
    }

    async fn on_game_close(&self, _game: &Game) -> Result<(), PluginError> {
        self.record(HookKind::GameClose).await
    }

    async fn on_shutdown(&self) -> Result<(), PluginError> {
        self.record(HookKind::Shutdown).await
    }

    fn as_emulator_plugin(&self) -> Option<&dyn EmulatorPlugin> {
        self.emulator_ids.as_ref().map(|_| self as &dyn EmulatorPlugin)
    }
}

#[async_trait]
impl EmulatorPlugin for RecordingPlugin {
    fn supported_emulator_ids(&self) -> Option<Vec<i64>> {
        self.emulator_ids.clone().flatten()
    }

    async fn check_for_updates(&self, emulator_id: i64) -> Result<bool, PluginError> {
        Ok(self.supports_emulator(emulator_id))
    }

    async fn update_emulator(&self, emulator_id: i64) -> Result<bool, PluginError> {
        if !self.supports_emulator(emulator_id) {
            return Err(PluginError::ExecutionFailed(format!(
                "emulator {} is not supported",
                emulator_id
            )));
        }
        Ok(true)
    }

    async fn configure_emulator(&self, _emulator_id: i64) -> Result<(), PluginError> {
        Ok(())
    }
}
