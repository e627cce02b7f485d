//! Settings file discovery and layered merging.
//!
//! Resolution order (later overrides earlier):
//! 1. `$TM_CONFIG_DIR/config.toml`, or `~/.config/testmachinery/config.toml`
//! 2. `./testmachinery.toml` (project-local)
//! 3. CLI arguments (handled externally)

use std::path::{Path, PathBuf};

use crate::{ConfigError, Result, Settings};

/// Default filename for project-local settings.
const PROJECT_CONFIG_FILE: &str = "testmachinery.toml";

/// Default filename within the user config directory.
const USER_CONFIG_FILE: &str = "config.toml";

/// Application name for platform directory resolution.
const APP_NAME: &str = "testmachinery";

/// Environment variable to override the user config directory.
const CONFIG_DIR_ENV: &str = "TM_CONFIG_DIR";

/// Tracks where each settings layer was loaded from.
#[derive(Debug, Clone)]
pub struct SettingsSource {
    pub path: PathBuf,
    /// Whether the file was found and loaded.
    pub loaded: bool,
}

/// Result of settings discovery.
#[derive(Debug, Clone)]
pub struct LoadedSettings {
    /// The merged settings.
    pub settings: Settings,
    /// Sources that were checked, lowest precedence first.
    pub sources: Vec<SettingsSource>,
    /// Warnings generated while loading (e.g. unreadable layers).
    pub warnings: Vec<String>,
}

impl LoadedSettings {
    /// Paths of the sources that were actually loaded.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }
}

/// Discover and merge all settings layers.
pub fn load_settings(project_dir: Option<&Path>) -> Result<LoadedSettings> {
    load_settings_with_options(project_dir, None)
}

/// Discover and merge settings with an explicit user config directory.
///
/// `config_dir` overrides both `TM_CONFIG_DIR` and the platform default.
pub fn load_settings_with_options(
    project_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Result<LoadedSettings> {
    let mut settings = Settings::new();
    let mut sources = Vec::new();
    let mut warnings = Vec::new();

    let user_path = match config_dir {
        Some(dir) => Some(dir.join(USER_CONFIG_FILE)),
        None => user_config_path(),
    };
    if let Some(path) = user_path {
        sources.push(load_layer(&mut settings, &path, &mut warnings));
    }

    let project_path = project_dir
        .map(|d| d.join(PROJECT_CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG_FILE));
    sources.push(load_layer(&mut settings, &project_path, &mut warnings));

    Ok(LoadedSettings {
        settings,
        sources,
        warnings,
    })
}

/// Load settings from a specific file (no discovery).
pub fn load_settings_file(path: &Path) -> Result<Settings> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Settings::from_toml(&contents)
}

/// Write settings to `path`, creating parent directories.
pub fn save_settings(settings: &Settings, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteFile {
            path: parent.display().to_string(),
            source: e,
        })?;
    }

    let contents = settings.to_toml()?;
    std::fs::write(path, contents).map_err(|e| ConfigError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })?;

    Ok(())
}

/// Path of the user settings file.
pub fn user_config_path() -> Option<PathBuf> {
    user_config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// User config directory: `TM_CONFIG_DIR`, then the platform default.
pub fn user_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Default directory for log files.
pub fn default_log_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join(APP_NAME).join("logs"))
}

/// Merge the file at `path` into `settings`; malformed files only warn.
fn load_layer(settings: &mut Settings, path: &Path, warnings: &mut Vec<String>) -> SettingsSource {
    if !path.is_file() {
        return SettingsSource {
            path: path.to_path_buf(),
            loaded: false,
        };
    }

    match load_settings_file(path) {
        Ok(layer) => {
            settings.merge(layer);
            SettingsSource {
                path: path.to_path_buf(),
                loaded: true,
            }
        }
        Err(e) => {
            warnings.push(format!("Failed to load {}: {}", path.display(), e));
            SettingsSource {
                path: path.to_path_buf(),
                loaded: false,
            }
        }
    }
}
