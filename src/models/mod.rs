//! Library data model.
//!
//! These are the records the host hands to plugin hooks and host services.
//! Persistence is outside the plugin runtime; the in-memory services in
//! [`crate::services::memory`] are enough for the CLI host and tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A gaming platform (NES, SNES, PS1, ...)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Platform {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub manufacturer: Option<String>,
    pub release_year: Option<i32>,
    pub icon_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Platform {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
            manufacturer: None,
            release_year: None,
            icon_path: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }
}

/// An emulator configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Emulator {
    pub id: i64,
    pub name: String,
    pub executable_path: PathBuf,
    /// Argument template; `{0}` is replaced by the game path
    pub command_line_arguments: Option<String>,
    pub platform_id: Option<i64>,
    pub is_default: bool,
    pub working_directory: Option<PathBuf>,
    pub use_quotes_for_path: bool,
    pub is_preset: bool,
    pub preset_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Emulator {
    pub fn new(id: i64, name: impl Into<String>, executable_path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            name: name.into(),
            executable_path: executable_path.into(),
            command_line_arguments: None,
            platform_id: None,
            is_default: false,
            working_directory: None,
            use_quotes_for_path: true,
            is_preset: false,
            preset_name: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn with_platform(mut self, platform_id: i64, is_default: bool) -> Self {
        self.platform_id = Some(platform_id);
        self.is_default = is_default;
        self
    }

    pub fn with_arguments(mut self, template: impl Into<String>) -> Self {
        self.command_line_arguments = Some(template.into());
        self
    }
}

/// A game in the library
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Game {
    pub id: i64,
    pub title: String,
    pub sort_title: Option<String>,
    pub file_path: PathBuf,

    pub release_year: Option<i32>,
    pub developer: Option<String>,
    pub publisher: Option<String>,
    pub genre: Option<String>,
    pub description: Option<String>,
    pub rating: Option<f32>,

    pub box_art_path: Option<PathBuf>,
    pub screenshot_path: Option<PathBuf>,
    pub background_path: Option<PathBuf>,
    pub video_path: Option<PathBuf>,

    pub platform_id: i64,
    pub preferred_emulator_id: Option<i64>,

    pub is_favorite: bool,
    pub last_played_at: Option<DateTime<Utc>>,
    pub play_count: u32,
    /// Minutes played
    pub play_time: Option<u32>,
    pub tags: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Game {
    pub fn new(id: i64, title: impl Into<String>, file_path: impl Into<PathBuf>, platform_id: i64) -> Self {
        Self {
            id,
            title: title.into(),
            sort_title: None,
            file_path: file_path.into(),
            release_year: None,
            developer: None,
            publisher: None,
            genre: None,
            description: None,
            rating: None,
            box_art_path: None,
            screenshot_path: None,
            background_path: None,
            video_path: None,
            platform_id,
            preferred_emulator_id: None,
            is_favorite: false,
            last_played_at: None,
            play_count: 0,
            play_time: None,
            tags: Vec::new(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }
}

/// Metadata returned by a media scraper lookup
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GameMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub developer: Option<String>,
    pub publisher: Option<String>,
    pub release_year: Option<i32>,
    pub genre: Option<String>,
    pub rating: Option<f32>,
    pub box_art_url: Option<String>,
    pub screenshot_url: Option<String>,
    pub background_url: Option<String>,
}
