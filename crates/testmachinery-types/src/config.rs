//! Configuration elements as they appear in Testrun manifests.
//!
//! Elements are declared at three places: the Testrun spec (global), a flow
//! branch (shared) and a single step. How they are merged is the business of
//! the config layering in `testmachinery-config`; this module only carries the
//! wire format.

use serde::{Deserialize, Serialize};

/// How a config element is exposed to the step container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigType {
    /// Exposed as an environment variable named after the element.
    Env,
    /// Mounted as a file at the element's `path`.
    File,
}

/// A single configuration element.
///
/// Exactly one of `value` and `value_from` must be set; file elements also
/// need a `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigElement {
    #[serde(rename = "type")]
    pub kind: ConfigType,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<ConfigSource>,

    /// Mount path for file elements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ConfigElement {
    /// Literal environment variable.
    pub fn env(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: ConfigType::Env,
            name: name.into(),
            value: Some(value.into()),
            value_from: None,
            path: None,
        }
    }

    /// Literal file mounted at `path`.
    pub fn file(name: impl Into<String>, path: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: ConfigType::File,
            name: name.into(),
            value: Some(value.into()),
            value_from: None,
            path: Some(path.into()),
        }
    }

    /// Environment variable read from a secret key.
    pub fn env_from_secret(
        name: impl Into<String>,
        secret: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            kind: ConfigType::Env,
            name: name.into(),
            value: None,
            value_from: Some(ConfigSource::secret(secret, key)),
            path: None,
        }
    }

    /// File read from a secret key and mounted at `path`.
    pub fn file_from_secret(
        name: impl Into<String>,
        path: impl Into<String>,
        secret: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            kind: ConfigType::File,
            name: name.into(),
            value: None,
            value_from: Some(ConfigSource::secret(secret, key)),
            path: Some(path.into()),
        }
    }
}

/// Reference to a value stored outside the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<KeyRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_key_ref: Option<KeyRef>,
}

impl ConfigSource {
    pub fn secret(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            secret_key_ref: Some(KeyRef::new(name, key)),
            config_map_key_ref: None,
        }
    }

    pub fn config_map(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            secret_key_ref: None,
            config_map_key_ref: Some(KeyRef::new(name, key)),
        }
    }
}

/// `name`/`key` pair addressing an entry of a secret or config map.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyRef {
    pub name: String,
    pub key: String,
}

impl KeyRef {
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
        }
    }
}
