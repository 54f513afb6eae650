//! Plugin Context
//!
//! The capability-scoped facade each plugin receives in `on_load`: a tagged
//! log channel, a private data directory and settings store, and shared
//! handles to the host services.

use crate::plugins::settings::{FromSettingValue, PluginSettingsStore, SettingValue, SETTINGS_FILE_NAME};
use crate::plugins::PluginError;
use crate::services::{
    EmulatorService, GameLauncherService, GameLibraryService, MediaScraperService, ServiceRegistry,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, trace, warn};

/// Log target used for every line a plugin writes
pub const PLUGIN_LOG_TARGET: &str = "launchdeck::plugin";

/// Log channel tagged with the owning plugin's ID
#[derive(Debug, Clone)]
pub struct PluginLogger {
    plugin_id: Arc<str>,
}

impl PluginLogger {
    pub fn new(plugin_id: &str) -> Self {
        Self {
            plugin_id: Arc::from(plugin_id),
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn trace(&self, message: &str) {
        trace!(target: PLUGIN_LOG_TARGET, plugin_id = %self.plugin_id, "{}", message);
    }

    pub fn debug(&self, message: &str) {
        debug!(target: PLUGIN_LOG_TARGET, plugin_id = %self.plugin_id, "{}", message);
    }

    pub fn info(&self, message: &str) {
        info!(target: PLUGIN_LOG_TARGET, plugin_id = %self.plugin_id, "{}", message);
    }

    pub fn warn(&self, message: &str) {
        warn!(target: PLUGIN_LOG_TARGET, plugin_id = %self.plugin_id, "{}", message);
    }

    pub fn error(&self, message: &str) {
        error!(target: PLUGIN_LOG_TARGET, plugin_id = %self.plugin_id, "{}", message);
    }
}

/// Per-plugin view of the host
pub struct PluginContext {
    plugin_id: String,
    services: Arc<ServiceRegistry>,
    logger: PluginLogger,
    data_directory: PathBuf,
    settings: Mutex<PluginSettingsStore>,
}

impl PluginContext {
    /// Build the context for `plugin_id`, loading any settings the plugin
    /// saved in an earlier session.
    pub fn new(plugin_id: &str, services: Arc<ServiceRegistry>, data_root: &Path) -> Self {
        let data_directory = plugin_data_directory(data_root, plugin_id);
        let settings = PluginSettingsStore::open(data_directory.join(SETTINGS_FILE_NAME));
        debug!(
            "Created context for plugin {} ({} stored settings)",
            plugin_id,
            settings.len()
        );

        Self {
            plugin_id: plugin_id.to_string(),
            services,
            logger: PluginLogger::new(plugin_id),
            data_directory,
            settings: Mutex::new(settings),
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn logger(&self) -> &PluginLogger {
        &self.logger
    }

    /// Private data directory, created on first use
    pub fn data_directory(&self) -> &Path {
        if let Err(e) = std::fs::create_dir_all(&self.data_directory) {
            self.logger
                .error(&format!("Failed to create data directory {:?}: {}", self.data_directory, e));
        }
        &self.data_directory
    }

    pub fn game_library(&self) -> Arc<dyn GameLibraryService> {
        Arc::clone(&self.services.game_library)
    }

    pub fn emulator_service(&self) -> Arc<dyn EmulatorService> {
        Arc::clone(&self.services.emulators)
    }

    pub fn game_launcher(&self) -> Arc<dyn GameLauncherService> {
        Arc::clone(&self.services.launcher)
    }

    pub fn media_scraper(&self) -> Arc<dyn MediaScraperService> {
        Arc::clone(&self.services.media_scraper)
    }

    fn store(&self) -> MutexGuard<'_, PluginSettingsStore> {
        // A panic while holding the lock cannot leave the map half-written.
        self.settings.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stored value for `key`, or `default` when absent or of another type
    pub fn get_setting<T: FromSettingValue>(&self, key: &str, default: T) -> T {
        match self.store().get_as::<T>(key) {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(e) => {
                self.logger.debug(&e.to_string());
                default
            }
        }
    }

    /// Stored value for `key`, distinguishing absent from mistyped
    pub fn try_setting<T: FromSettingValue>(&self, key: &str) -> Result<Option<T>, PluginError> {
        self.store().get_as::<T>(key)
    }

    /// Store `value` and persist immediately. Save failures are logged; the
    /// in-memory value stays authoritative until a later save succeeds.
    pub fn set_setting(&self, key: &str, value: impl Into<SettingValue>) {
        if let Err(e) = self.store().set(key, value.into()) {
            self.logger
                .error(&format!("Failed to save plugin settings: {}", e));
        }
    }

    /// Store any serde value as a structured setting
    pub fn set_structured<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(json) => self.set_setting(key, SettingValue::Structured(json)),
            Err(e) => self
                .logger
                .error(&format!("Failed to serialize setting '{}': {}", key, e)),
        }
    }

    /// Read a structured setting, or `default` when absent or not decodable as `T`
    pub fn get_structured<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        let json = match self.store().get(key) {
            Some(SettingValue::Structured(json)) => json.clone(),
            _ => return default,
        };
        serde_json::from_value(json).unwrap_or(default)
    }

    pub fn remove_setting(&self, key: &str) {
        if let Err(e) = self.store().remove(key) {
            self.logger
                .error(&format!("Failed to save plugin settings: {}", e));
        }
    }

    /// Show a message and block until the user dismisses it
    pub fn show_message(&self, title: &str, message: &str) {
        self.services.interaction.show_message(title, message);
    }

    /// Ask the user a yes/no question and block for the answer
    pub fn show_confirmation(&self, title: &str, message: &str) -> bool {
        self.services.interaction.show_confirmation(title, message)
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin_id", &self.plugin_id)
            .field("data_directory", &self.data_directory)
            .finish()
    }
}

/// `<data_root>/Plugins/<plugin-id>`.
///
/// The ID is percent-encoded into a file name: ASCII letters, digits, `.`,
/// `-` and `_` are kept and every other byte becomes `%XX`. Distinct IDs
/// always get distinct directories.
pub fn plugin_data_directory(data_root: &Path, plugin_id: &str) -> PathBuf {
    let name = if plugin_id.is_empty() {
        "%".to_string()
    } else if plugin_id.bytes().all(|b| b == b'.') {
        "%2E".repeat(plugin_id.len())
    } else {
        let mut name = String::with_capacity(plugin_id.len());
        for byte in plugin_id.bytes() {
            match byte {
                b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' | b'-' | b'_' => name.push(byte as char),
                _ => name.push_str(&format!("%{:02X}", byte)),
            }
        }
        name
    };
    data_root.join("Plugins").join(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::test_services;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_data_directory_is_deterministic_and_encoded() {
        let root = Path::new("/data");
        assert_eq!(
            plugin_data_directory(root, "com.example.retro-shaders"),
            PathBuf::from("/data/Plugins/com.example.retro-shaders")
        );
        assert_eq!(
            plugin_data_directory(root, "../escape"),
            PathBuf::from("/data/Plugins/..%2Fescape")
        );
        assert_eq!(plugin_data_directory(root, ".."), PathBuf::from("/data/Plugins/%2E%2E"));
        assert_eq!(plugin_data_directory(root, ""), PathBuf::from("/data/Plugins/%"));
        assert_eq!(plugin_data_directory(root, "50%"), PathBuf::from("/data/Plugins/50%25"));
    }

    #[test]
    fn test_similar_ids_get_distinct_directories() {
        let root = Path::new("/data");
        let ids = ["my plugin", "my_plugin", "my/plugin", "my:plugin", "my%20plugin", "my%2Fplugin"];
        let mut dirs: Vec<PathBuf> = ids.iter().map(|id| plugin_data_directory(root, id)).collect();
        dirs.sort();
        dirs.dedup();
        assert_eq!(dirs.len(), ids.len());
    }

    #[test]
    fn test_similar_ids_do_not_share_settings() {
        let temp_dir = TempDir::new().unwrap();
        let services = test_services();

        let spaced = PluginContext::new("my plugin", Arc::clone(&services), temp_dir.path());
        spaced.set_setting("token", "secret-of-a");

        let underscored = PluginContext::new("my_plugin", services, temp_dir.path());
        assert_eq!(
            underscored.get_setting("token", String::from("<none>")),
            "<none>"
        );
        assert_ne!(spaced.data_directory(), underscored.data_directory());
    }

    #[test]
    fn test_data_directory_created_on_first_use() {
        let temp_dir = TempDir::new().unwrap();
        let context = PluginContext::new("lazy", test_services(), temp_dir.path());

        let expected = temp_dir.path().join("Plugins").join("lazy");
        assert!(!expected.exists());
        assert_eq!(context.data_directory(), expected.as_path());
        assert!(expected.is_dir());
    }

    #[test]
    fn test_settings_survive_a_fresh_context() {
        let temp_dir = TempDir::new().unwrap();
        let services = test_services();

        let first = PluginContext::new("counter", Arc::clone(&services), temp_dir.path());
        first.set_setting("k", 42);

        let second = PluginContext::new("counter", services, temp_dir.path());
        assert_eq!(second.get_setting("k", 0i64), 42);
    }

    #[test]
    fn test_settings_are_private_per_plugin() {
        let temp_dir = TempDir::new().unwrap();
        let services = test_services();

        let a = PluginContext::new("a", Arc::clone(&services), temp_dir.path());
        let b = PluginContext::new("b", services, temp_dir.path());
        a.set_setting("theme", "dark");

        assert_eq!(b.get_setting("theme", String::from("default")), "default");
        assert_eq!(a.get_setting("theme", String::new()), "dark");
    }

    #[test]
    fn test_mismatch_falls_back_but_try_setting_reports() {
        let temp_dir = TempDir::new().unwrap();
        let context = PluginContext::new("typed", test_services(), temp_dir.path());
        context.set_setting("enabled", true);

        assert_eq!(context.get_setting("enabled", 5i64), 5);
        assert!(matches!(
            context.try_setting::<i64>("enabled"),
            Err(PluginError::SettingTypeMismatch { .. })
        ));
        assert_eq!(context.try_setting::<bool>("enabled").unwrap(), Some(true));
    }

    #[test]
    fn test_structured_settings() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Window {
            width: u32,
            height: u32,
        }

        let temp_dir = TempDir::new().unwrap();
        let context = PluginContext::new("layout", test_services(), temp_dir.path());
        context.set_structured("window", &Window { width: 640, height: 480 });

        let fallback = Window { width: 1, height: 1 };
        assert_eq!(
            context.get_structured("window", fallback),
            Window { width: 640, height: 480 }
        );
        assert_eq!(context.get_structured("missing", 7u8), 7);

        context.remove_setting("window");
        assert!(context.try_setting::<serde_json::Value>("window").unwrap().is_none());
    }

    #[test]
    fn test_notifications_go_through_interaction_service() {
        use crate::services::MockUserInteraction;

        let mut interaction = MockUserInteraction::new();
        interaction
            .expect_show_message()
            .withf(|title, message| title.to_string() == "Hello" && message.to_string() == "World")
            .times(1)
            .return_const(());
        interaction
            .expect_show_confirmation()
            .times(1)
            .return_const(true);

        let temp_dir = TempDir::new().unwrap();
        let services = crate::testing::fixtures::services_with_interaction(Arc::new(interaction));
        let context = PluginContext::new("notify", services, temp_dir.path());

        context.show_message("Hello", "World");
        assert!(context.show_confirmation("Sure?", "Really?"));
    }
}
