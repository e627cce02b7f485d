//! Reading and writing manifests in YAML or JSON.
//!
//! The format is picked from the file extension: `.yaml`/`.yml` or `.json`.

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::ManifestError;

/// Manifest serialization format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Json,
}

impl Format {
    /// Determine the format from a path's extension.
    pub fn from_path(path: &Path) -> Result<Self, ManifestError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Ok(Format::Yaml),
            Some("json") => Ok(Format::Json),
            _ => Err(ManifestError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Parse a manifest string.
pub fn from_str<T: DeserializeOwned>(content: &str, format: Format) -> Result<T, ManifestError> {
    match format {
        Format::Yaml => Ok(serde_yaml::from_str(content)?),
        Format::Json => Ok(serde_json::from_str(content)?),
    }
}

/// Render a manifest to a string.
pub fn to_string<T: Serialize>(value: &T, format: Format) -> Result<String, ManifestError> {
    match format {
        Format::Yaml => Ok(serde_yaml::to_string(value)?),
        Format::Json => Ok(serde_json::to_string_pretty(value)?),
    }
}

/// Load a manifest from disk.
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T, ManifestError> {
    let format = Format::from_path(path)?;
    let content = std::fs::read_to_string(path).map_err(|e| ManifestError::Read {
        path: path.display().to_string(),
        source: e,
    })?;
    from_str(&content, format)
}

/// Write a manifest to disk, creating parent directories as needed.
pub fn save<T: Serialize>(value: &T, path: &Path) -> Result<(), ManifestError> {
    let format = Format::from_path(path)?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| ManifestError::Write {
            path: parent.display().to_string(),
            source: e,
        })?;
    }
    let content = to_string(value, format)?;
    std::fs::write(path, content).map_err(|e| ManifestError::Write {
        path: path.display().to_string(),
        source: e,
    })
}
