use log::{LevelFilter, debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::cache::{
    CacheConfig, DEFAULT_CACHE_PAGES, DEFAULT_EVICTIONS_PER_IDLE_WORKER,
    DEFAULT_MAX_RENDER_ATTEMPTS, DEFAULT_PAGE_MARGIN, DEFAULT_WORKERS,
};
use crate::scroll::{DEFAULT_AUTOSCROLL_SPEED, DEFAULT_SCROLL_STEP};

pub const CURRENT_VERSION: u32 = 1;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "least";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_cache_pages")]
    pub cache_pages: usize,

    #[serde(default = "default_page_margin")]
    pub page_margin: f32,

    #[serde(default = "default_scroll_step")]
    pub scroll_step: f32,

    #[serde(default = "default_autoscroll_speed")]
    pub autoscroll_speed: f32,

    #[serde(default = "default_max_render_attempts")]
    pub max_render_attempts: u32,

    /// Pages evicted per scheduler tick for every idle worker
    #[serde(default = "default_evictions_per_idle_worker")]
    pub evictions_per_idle_worker: usize,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_cache_pages() -> usize {
    DEFAULT_CACHE_PAGES
}

fn default_page_margin() -> f32 {
    DEFAULT_PAGE_MARGIN
}

fn default_scroll_step() -> f32 {
    DEFAULT_SCROLL_STEP
}

fn default_autoscroll_speed() -> f32 {
    DEFAULT_AUTOSCROLL_SPEED
}

fn default_max_render_attempts() -> u32 {
    DEFAULT_MAX_RENDER_ATTEMPTS
}

fn default_evictions_per_idle_worker() -> usize {
    DEFAULT_EVICTIONS_PER_IDLE_WORKER
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            workers: default_workers(),
            cache_pages: default_cache_pages(),
            page_margin: default_page_margin(),
            scroll_step: default_scroll_step(),
            autoscroll_speed: default_autoscroll_speed(),
            max_render_attempts: default_max_render_attempts(),
            evictions_per_idle_worker: default_evictions_per_idle_worker(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Cache tunables for a scheduler starting at `scale`
    #[must_use]
    pub fn cache_config(&self, scale: f32) -> CacheConfig {
        CacheConfig {
            workers: self.workers.max(1),
            cache_pages: self.cache_pages,
            max_render_attempts: self.max_render_attempts.max(1),
            evictions_per_idle_worker: self.evictions_per_idle_worker,
            scale,
        }
    }

    /// Parsed `log_level`, falling back to `Info` for unknown names
    #[must_use]
    pub fn level_filter(&self) -> LevelFilter {
        LevelFilter::from_str(self.log_level.trim()).unwrap_or_else(|_| {
            warn!("Unknown log level {:?}, using info", self.log_level);
            LevelFilter::Info
        })
    }
}

pub fn preferred_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

/// Load settings from `explicit`, or from the config directory. A missing
/// file in the config directory is created with defaults; any unreadable
/// file yields defaults.
pub fn load_settings(explicit: Option<&Path>) -> Settings {
    if let Some(path) = explicit {
        return load_settings_from_path(path).unwrap_or_default();
    }

    let Some(path) = preferred_config_path() else {
        warn!("Could not determine config directory, using default settings");
        return Settings::default();
    };
    if path.exists() {
        load_settings_from_path(&path).unwrap_or_default()
    } else {
        info!("Settings file not found, creating with defaults at {path:?}");
        let settings = Settings::default();
        save_settings_to_file(&settings, &path);
        settings
    }
}

pub fn load_settings_from_path(path: &Path) -> Option<Settings> {
    match fs::read_to_string(path) {
        Ok(content) => match serde_yaml::from_str::<Settings>(&content) {
            Ok(mut settings) => {
                debug!("Loaded settings from {path:?}");

                if settings.version < CURRENT_VERSION {
                    migrate_settings(&mut settings);
                    save_settings_to_file(&settings, path);
                }
                Some(settings)
            }
            Err(e) => {
                error!("Failed to parse settings file {path:?}: {e}");
                None
            }
        },
        Err(e) => {
            error!("Failed to read settings file {path:?}: {e}");
            None
        }
    }
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );

    // Future migrations go here:
    // if settings.version < 2 {
    //     migrate_v1_to_v2(settings);
    // }

    settings.version = CURRENT_VERSION;
}

pub fn save_settings_to_file(settings: &Settings, path: &Path) {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
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
    content.push('\n');
    content.push_str("# Render threads; fixed for the session\n");
    content.push_str(&format!("workers: {}\n", settings.workers));
    content.push_str("# Pages kept rendered around the focused page (rounded up to odd)\n");
    content.push_str(&format!("cache_pages: {}\n", settings.cache_pages));
    content.push_str(&format!(
        "max_render_attempts: {}\n",
        settings.max_render_attempts
    ));
    content.push_str(&format!(
        "evictions_per_idle_worker: {}\n",
        settings.evictions_per_idle_worker
    ));
    content.push('\n');
    content.push_str(&format!("page_margin: {:?}\n", settings.page_margin));
    content.push_str(&format!("scroll_step: {:?}\n", settings.scroll_step));
    content.push_str(&format!(
        "autoscroll_speed: {:?}\n",
        settings.autoscroll_speed
    ));
    content.push('\n');
    content.push_str("# off, error, warn, info, debug or trace\n");
    content.push_str(&format!("log_level: \"{}\"\n", settings.log_level));

    content
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn generated_yaml_round_trips() {
        let settings = Settings {
            workers: 2,
            cache_pages: 9,
            page_margin: 12.5,
            log_level: "debug".to_string(),
            ..Settings::default()
        };
        let parsed: Settings = serde_yaml::from_str(&generate_settings_yaml(&settings)).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let parsed: Settings = serde_yaml::from_str("workers: 8\n").unwrap();
        assert_eq!(parsed.workers, 8);
        assert_eq!(parsed.cache_pages, DEFAULT_CACHE_PAGES);
        assert_eq!(parsed.scroll_step, 42.0);
        assert_eq!(parsed.version, CURRENT_VERSION);
    }

    #[test]
    fn old_version_is_migrated_and_rewritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "version: 0\nworkers: 3\n").unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.version, CURRENT_VERSION);
        assert_eq!(settings.workers, 3);

        let rewritten = fs::read_to_string(&path).unwrap();
        assert!(rewritten.contains(&format!("version: {CURRENT_VERSION}")));
    }

    #[test]
    fn unreadable_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "workers: [not, a, number]\n").unwrap();

        assert!(load_settings_from_path(&path).is_none());
        assert_eq!(load_settings(Some(&path)), Settings::default());
        assert_eq!(
            load_settings(Some(&dir.path().join("absent.yaml"))),
            Settings::default()
        );
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        save_settings_to_file(&Settings::default(), &path);
        assert_eq!(load_settings_from_path(&path), Some(Settings::default()));
    }

    #[test]
    fn cache_config_clamps_counts() {
        let settings = Settings {
            workers: 0,
            max_render_attempts: 0,
            ..Settings::default()
        };
        let config = settings.cache_config(1.5);
        assert_eq!(config.workers, 1);
        assert_eq!(config.max_render_attempts, 1);
        assert_eq!(config.scale, 1.5);
        assert_eq!(config.budget(), 5);
    }

    #[test]
    fn level_filter_parses_names() {
        let mut settings = Settings::default();
        assert_eq!(settings.level_filter(), LevelFilter::Info);
        settings.log_level = "Trace".to_string();
        assert_eq!(settings.level_filter(), LevelFilter::Trace);
        settings.log_level = "loud".to_string();
        assert_eq!(settings.level_filter(), LevelFilter::Info);
    }
}
