//! Error types for the shared data model.

use thiserror::Error;

/// Errors raised while decoding a position string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionError {
    #[error("malformed position '{0}': expected '<outer>/<inner>'")]
    Malformed(String),
}

/// Errors raised while reading manifests (Testruns, workflows, test definitions).
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to write '{path}': {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid YAML manifest: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid JSON manifest: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported manifest extension for '{0}' (expected .yaml, .yml or .json)")]
    UnsupportedFormat(String),
}
