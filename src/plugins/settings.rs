//! Plugin Settings Store
//!
//! Each plugin owns one flat key/value store persisted as JSON in its data
//! directory. Values are tagged so a typed read can tell "absent" apart from
//! "present with another type".

use crate::plugins::PluginError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// File name of the settings store inside a plugin's data directory
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Setting value with type information
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SettingValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
    Structured(serde_json::Value),
}

impl SettingValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            SettingValue::String(_) => "string",
            SettingValue::Integer(_) => "integer",
            SettingValue::Float(_) => "float",
            SettingValue::Boolean(_) => "boolean",
            SettingValue::Bytes(_) => "bytes",
            SettingValue::Structured(_) => "structured",
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Conversion out of a stored [`SettingValue`]
pub trait FromSettingValue: Sized {
    const TYPE_NAME: &'static str;

    fn from_setting(value: &SettingValue) -> Option<Self>;
}

impl FromSettingValue for String {
    const TYPE_NAME: &'static str = "string";

    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromSettingValue for i64 {
    const TYPE_NAME: &'static str = "integer";

    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl FromSettingValue for i32 {
    const TYPE_NAME: &'static str = "integer";

    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Integer(i) => i32::try_from(*i).ok(),
            _ => None,
        }
    }
}

impl FromSettingValue for u32 {
    const TYPE_NAME: &'static str = "integer";

    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Integer(i) => u32::try_from(*i).ok(),
            _ => None,
        }
    }
}

impl FromSettingValue for f64 {
    const TYPE_NAME: &'static str = "float";

    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Float(f) => Some(*f),
            SettingValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl FromSettingValue for bool {
    const TYPE_NAME: &'static str = "boolean";

    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromSettingValue for Vec<u8> {
    const TYPE_NAME: &'static str = "bytes";

    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Bytes(b) => Some(b.clone()),
            _ => None,
        }
    }
}

impl FromSettingValue for serde_json::Value {
    const TYPE_NAME: &'static str = "structured";

    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Structured(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        SettingValue::String(value)
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        SettingValue::String(value.to_string())
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        SettingValue::Integer(value)
    }
}

impl From<i32> for SettingValue {
    fn from(value: i32) -> Self {
        SettingValue::Integer(value.into())
    }
}

impl From<u32> for SettingValue {
    fn from(value: u32) -> Self {
        SettingValue::Integer(value.into())
    }
}

impl From<f64> for SettingValue {
    fn from(value: f64) -> Self {
        SettingValue::Float(value)
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        SettingValue::Boolean(value)
    }
}

impl From<Vec<u8>> for SettingValue {
    fn from(value: Vec<u8>) -> Self {
        SettingValue::Bytes(value)
    }
}

impl From<serde_json::Value> for SettingValue {
    fn from(value: serde_json::Value) -> Self {
        SettingValue::Structured(value)
    }
}

/// Key/value store backed by one JSON file
///
/// Every write rewrites the whole file, so concurrent writers to the same
/// store must be serialized by the owner.
#[derive(Debug)]
pub struct PluginSettingsStore {
    path: PathBuf,
    values: BTreeMap<String, SettingValue>,
}

impl PluginSettingsStore {
    /// Open the store at `path`. A missing file yields an empty store; an
    /// unreadable or corrupt file is logged and also yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match Self::read_file(&path) {
            Ok(values) => values,
            Err(e) => {
                error!("Failed to load plugin settings from {:?}: {}", path, e);
                BTreeMap::new()
            }
        };
        Self { path, values }
    }

    fn read_file(path: &Path) -> Result<BTreeMap<String, SettingValue>, PluginError> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| PluginError::ConfigurationError(format!("corrupt settings file: {}", e)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.values.get(key)
    }

    /// Typed read that reports a mismatch instead of hiding it
    pub fn get_as<T: FromSettingValue>(&self, key: &str) -> Result<Option<T>, PluginError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(value) => T::from_setting(value)
                .map(Some)
                .ok_or_else(|| PluginError::SettingTypeMismatch {
                    key: key.to_string(),
                    expected: T::TYPE_NAME,
                    found: value.type_name(),
                }),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Insert and persist. The in-memory value is kept even if the save fails.
    pub fn set(&mut self, key: impl Into<String>, value: SettingValue) -> Result<(), PluginError> {
        self.values.insert(key.into(), value);
        self.save()
    }

    /// Remove and persist; returns the previous value
    pub fn remove(&mut self, key: &str) -> Result<Option<SettingValue>, PluginError> {
        let previous = self.values.remove(key);
        if previous.is_some() {
            self.save()?;
        }
        Ok(previous)
    }

    /// Rewrite the whole file
    pub fn save(&self) -> Result<(), PluginError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.values)
            .map_err(|e| PluginError::ConfigurationError(e.to_string()))?;
        std::fs::write(&self.path, json)?;
        debug!("Saved {} plugin settings to {:?}", self.values.len(), self.path);
        Ok(())
    }
}
