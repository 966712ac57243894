use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::block::cache::DEFAULT_CACHE_CAPACITY;
use crate::block::params::DEFAULT_DPI;

pub const CURRENT_VERSION: u32 = 2;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "slidenote";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Defer rendering until a block scrolls into view
    #[serde(default = "default_true")]
    pub lazy_load: bool,

    /// Run `annot` scripts
    #[serde(default = "default_true")]
    pub allow_annotations: bool,

    /// Zoom used when a block has no `dpi` line
    #[serde(default = "default_dpi")]
    pub default_dpi: f32,

    /// Fallback timer step; blocks wait `(first_page % 15 + 1)` steps
    #[serde(default = "default_fallback_step")]
    pub lazy_fallback_step_ms: u64,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_true() -> bool {
    true
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_dpi() -> f32 {
    DEFAULT_DPI
}

fn default_fallback_step() -> u64 {
    5000
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            lazy_load: true,
            allow_annotations: true,
            default_dpi: default_dpi(),
            lazy_fallback_step_ms: default_fallback_step(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl Settings {
    /// Fallback delay for a block whose first selected page is `first_page`
    #[must_use]
    pub fn fallback_delay(&self, first_page: usize) -> std::time::Duration {
        let steps = (first_page % 15 + 1) as u64;
        std::time::Duration::from_millis(steps.saturating_mul(self.lazy_fallback_step_ms))
    }
}

#[must_use]
pub fn preferred_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

/// Load settings from the user config directory.
///
/// A missing file is created with defaults. Unreadable or malformed files are
/// logged and defaults are used.
#[must_use]
pub fn load_settings() -> Settings {
    let Some(path) = preferred_config_path() else {
        warn!("Could not determine config directory, using default settings");
        return Settings::default();
    };
    if path.exists() {
        load_settings_from_path(&path)
    } else {
        info!("Settings file not found, creating with defaults at {path:?}");
        let settings = Settings::default();
        save_settings_to_file(&settings, &path);
        settings
    }
}

#[must_use]
pub fn load_settings_from_path(path: &Path) -> Settings {
    match read_settings(path) {
        Ok(mut settings) => {
            debug!("Loaded settings from {path:?}");
            if settings.version < CURRENT_VERSION {
                migrate_settings(&mut settings);
                save_settings_to_file(&settings, path);
            }
            sanitize(&mut settings);
            settings
        }
        Err(e) => {
            error!("{e:#}");
            Settings::default()
        }
    }
}

fn read_settings(path: &Path) -> Result<Settings> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file {path:?}"))?;
    serde_yaml::from_str::<Settings>(&content)
        .with_context(|| format!("Failed to parse settings file {path:?}"))
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );

    // v1 stored the fallback step in seconds
    if settings.version < 2 && settings.lazy_fallback_step_ms < 1000 {
        settings.lazy_fallback_step_ms *= 1000;
    }

    settings.version = CURRENT_VERSION;
}

fn sanitize(settings: &mut Settings) {
    if !(settings.default_dpi.is_finite() && settings.default_dpi > 0.0) {
        warn!(
            "Ignoring invalid default_dpi {}, using {DEFAULT_DPI}",
            settings.default_dpi
        );
        settings.default_dpi = DEFAULT_DPI;
    }
    if settings.cache_capacity == 0 {
        warn!("cache_capacity must be positive, using {DEFAULT_CACHE_CAPACITY}");
        settings.cache_capacity = DEFAULT_CACHE_CAPACITY;
    }
}

pub fn save_settings_to_file(settings: &Settings, path: &Path) {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            if let Err(e) = fs::create_dir_all(parent) {
                error!("Failed to create config directory {parent:?}: {e}");
                return;
            }
        }
    }

    let content = generate_settings_yaml(settings);

    match fs::write(path, content) {
        Ok(()) => debug!("Saved settings to {path:?}"),
        Err(e) => error!("Failed to save settings to {path:?}: {e}"),
    }
}

fn generate_settings_yaml(settings: &Settings) -> String {
    let mut content = String::new();

    content.push_str(&format!("version: {}\n", settings.version));
    content.push_str("# Render blocks only once they scroll into view\n");
    content.push_str(&format!("lazy_load: {}\n", settings.lazy_load));
    content.push_str(&format!(
        "allow_annotations: {}\n",
        settings.allow_annotations
    ));
    content.push_str(&format!("default_dpi: {}\n", settings.default_dpi));
    content.push_str(&format!(
        "lazy_fallback_step_ms: {}\n",
        settings.lazy_fallback_step_ms
    ));
    content.push_str(&format!("cache_capacity: {}\n", settings.cache_capacity));

    content
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn missing_fields_take_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "version: 2\nlazy_load: false\n").unwrap();

        let settings = load_settings_from_path(&path);
        assert!(!settings.lazy_load);
        assert!(settings.allow_annotations);
        assert_eq!(settings.default_dpi, DEFAULT_DPI);
        assert_eq!(settings.cache_capacity, DEFAULT_CACHE_CAPACITY);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "lazy_load: [not, a, bool\n").unwrap();
        assert_eq!(load_settings_from_path(&path), Settings::default());

        assert_eq!(
            load_settings_from_path(&dir.path().join("absent.yaml")),
            Settings::default()
        );
    }

    #[test]
    fn saved_yaml_loads_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        let settings = Settings {
            allow_annotations: false,
            default_dpi: 1.5,
            cache_capacity: 4,
            ..Settings::default()
        };
        save_settings_to_file(&settings, &path);
        assert_eq!(load_settings_from_path(&path), settings);
    }

    #[test]
    fn old_versions_are_migrated_and_rewritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "version: 1\nlazy_fallback_step_ms: 3\n").unwrap();

        let settings = load_settings_from_path(&path);
        assert_eq!(settings.version, CURRENT_VERSION);
        assert_eq!(settings.lazy_fallback_step_ms, 3000);
        assert!(
            fs::read_to_string(&path)
                .unwrap()
                .contains("version: 2")
        );
    }

    #[test]
    fn invalid_values_are_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "default_dpi: -1\ncache_capacity: 0\n").unwrap();

        let settings = load_settings_from_path(&path);
        assert_eq!(settings.default_dpi, DEFAULT_DPI);
        assert_eq!(settings.cache_capacity, DEFAULT_CACHE_CAPACITY);
    }

    #[test]
    fn fallback_delay_staggers_by_first_page() {
        let settings = Settings::default();
        assert_eq!(settings.fallback_delay(0), Duration::from_secs(5));
        assert_eq!(settings.fallback_delay(3), Duration::from_secs(20));
        assert_eq!(settings.fallback_delay(15), Duration::from_secs(5));
    }
}
