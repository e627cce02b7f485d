//! Configuration error types.

use crate::layering::{ConfigKey, ConfigLevel};

/// Result type alias for config operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Two config elements with the same key declared on the same level.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("conflicting {level} config: '{key}' is declared more than once")]
pub struct ConfigConflictError {
    pub level: ConfigLevel,
    pub key: ConfigKey,
}

/// Errors that can occur during settings loading and config layering.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read a settings file.
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    /// Failed to write a settings file.
    #[error("failed to write config file '{path}': {source}")]
    WriteFile {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Failed to serialize settings.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A config element is malformed.
    #[error("invalid config element '{name}': {reason}")]
    InvalidElement { name: String, reason: String },

    /// Ambiguous configuration on one level.
    #[error(transparent)]
    Conflict(#[from] ConfigConflictError),
}
