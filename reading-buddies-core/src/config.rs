//! Configuration for the reading buddies engine.
//!
//! This module provides the `Config` struct with a builder pattern for
//! configuring asset locations, the hatch delay, history limits, and the
//! defaults used when no persisted state exists.

use std::time::Duration;

/// Default directory holding per-character configs.
const DEFAULT_BUDDY_CONFIG_DIR: &str = "/public/assets/buddies";

/// Default path of the shared multi-character config.
const DEFAULT_SHARED_CONFIG_PATH: &str = "/public/assets/buddies/humanoid-buddies.json";

/// Marker in an animation path that identifies the shared multi-character file.
const DEFAULT_SHARED_ASSET_MARKER: &str = "humanoid-buddies";

/// Default accessory catalog path.
const DEFAULT_ACCESSORY_CATALOG_PATH: &str = "/public/assets/accessories/index.json";

/// Default audio index path.
const DEFAULT_AUDIO_INDEX_PATH: &str = "/public/assets/audio/index.json";

/// Default egg catalog path.
const DEFAULT_EGG_CATALOG_PATH: &str = "/assets/eggs/index.json";

/// Default delay between starting and finishing a hatch, in milliseconds.
const DEFAULT_HATCH_DELAY_MS: u64 = 2000;

/// Default number of interaction events kept.
const DEFAULT_INTERACTION_HISTORY_LIMIT: usize = 100;

/// Default locale for voice lines.
pub const DEFAULT_LOCALE: &str = "en-US";

/// Default amount of progress an egg needs.
const DEFAULT_TARGET_PROGRESS: u32 = 100;

/// Configuration shared by the managers.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing `{id}/config.json` character configs.
    pub buddy_config_dir: String,

    /// Path of the shared multi-character config.
    pub shared_config_path: String,

    /// Substring of an animation path that marks the shared file.
    pub shared_asset_marker: String,

    /// Path of the accessory catalog.
    pub accessory_catalog_path: String,

    /// Path of the audio index.
    pub audio_index_path: String,

    /// Path of the egg catalog.
    pub egg_catalog_path: String,

    /// How long a hatch takes before the buddy becomes active.
    pub hatch_delay: Duration,

    /// Maximum interaction events kept by the buddy controller.
    pub interaction_history_limit: usize,

    /// Locale used for new audio settings and as the voice-line fallback.
    pub default_locale: String,

    /// Target progress used when none is given.
    pub default_target_progress: u32,

    /// Enables development-only helpers.
    pub dev_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buddy_config_dir: DEFAULT_BUDDY_CONFIG_DIR.to_string(),
            shared_config_path: DEFAULT_SHARED_CONFIG_PATH.to_string(),
            shared_asset_marker: DEFAULT_SHARED_ASSET_MARKER.to_string(),
            accessory_catalog_path: DEFAULT_ACCESSORY_CATALOG_PATH.to_string(),
            audio_index_path: DEFAULT_AUDIO_INDEX_PATH.to_string(),
            egg_catalog_path: DEFAULT_EGG_CATALOG_PATH.to_string(),
            hatch_delay: Duration::from_millis(DEFAULT_HATCH_DELAY_MS),
            interaction_history_limit: DEFAULT_INTERACTION_HISTORY_LIMIT,
            default_locale: DEFAULT_LOCALE.to_string(),
            default_target_progress: DEFAULT_TARGET_PROGRESS,
            dev_mode: false,
        }
    }
}

impl Config {
    /// Create a new Config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the directory holding per-character configs.
    pub fn buddy_config_dir(mut self, dir: impl Into<String>) -> Self {
        self.buddy_config_dir = dir.into();
        self
    }

    /// Set the shared multi-character config path.
    pub fn shared_config_path(mut self, path: impl Into<String>) -> Self {
        self.shared_config_path = path.into();
        self
    }

    /// Set the marker identifying the shared animation file.
    pub fn shared_asset_marker(mut self, marker: impl Into<String>) -> Self {
        self.shared_asset_marker = marker.into();
        self
    }

    /// Set the accessory catalog path.
    pub fn accessory_catalog_path(mut self, path: impl Into<String>) -> Self {
        self.accessory_catalog_path = path.into();
        self
    }

    /// Set the audio index path.
    pub fn audio_index_path(mut self, path: impl Into<String>) -> Self {
        self.audio_index_path = path.into();
        self
    }

    /// Set the egg catalog path.
    pub fn egg_catalog_path(mut self, path: impl Into<String>) -> Self {
        self.egg_catalog_path = path.into();
        self
    }

    /// Set the hatch delay.
    pub fn hatch_delay(mut self, delay: Duration) -> Self {
        self.hatch_delay = delay;
        self
    }

    /// Set the hatch delay in milliseconds.
    pub fn hatch_delay_ms(mut self, ms: u64) -> Self {
        self.hatch_delay = Duration::from_millis(ms);
        self
    }

    /// Set the interaction history limit.
    pub fn interaction_history_limit(mut self, limit: usize) -> Self {
        self.interaction_history_limit = limit;
        self
    }

    /// Set the default locale.
    pub fn default_locale(mut self, locale: impl Into<String>) -> Self {
        self.default_locale = locale.into();
        self
    }

    /// Set the default target progress.
    pub fn default_target_progress(mut self, target: u32) -> Self {
        self.default_target_progress = target;
        self
    }

    /// Enable or disable development helpers.
    pub fn dev_mode(mut self, enabled: bool) -> Self {
        self.dev_mode = enabled;
        self
    }

    /// Path of the config for the given character.
    pub fn buddy_config_path(&self, buddy_id: &str) -> String {
        format!(
            "{}/{}/config.json",
            self.buddy_config_dir.trim_end_matches('/'),
            buddy_id
        )
    }

    /// Whether an animation path refers to the shared multi-character file.
    pub fn is_shared_asset(&self, riv_path: &str) -> bool {
        !self.shared_asset_marker.is_empty() && riv_path.contains(&self.shared_asset_marker)
    }
}
