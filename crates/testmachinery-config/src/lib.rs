//! Configuration for Testmachinery.
//!
//! Two unrelated kinds of configuration live here:
//! - controller [`Settings`] loaded from TOML with layered discovery
//!   (user config dir, then project-local `testmachinery.toml`);
//! - [`LayeredConfig`], the typed Global / Shared / Step merge of the config
//!   elements declared in a Testrun.

pub mod discovery;
pub mod error;
pub mod layering;
pub mod types;

pub use discovery::{
    LoadedSettings, SettingsSource, default_log_dir, load_settings, load_settings_file,
    load_settings_with_options, save_settings, user_config_dir, user_config_path,
};
pub use error::{ConfigConflictError, ConfigError, Result};
pub use layering::{ConfigEntry, ConfigKey, ConfigLevel, ConfigValue, LayeredConfig};
pub use types::*;
