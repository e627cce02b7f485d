//! Config layering: Global, Shared (branch) and Step elements merged per step.
//!
//! Each level holds at most one element per [`ConfigKey`]. Flattening walks the
//! levels from least to most specific, so a step element overrides a branch
//! element with the same key, which overrides a global one.

use std::collections::BTreeMap;
use std::fmt;

use testmachinery_types::{ConfigElement, ConfigType, KeyRef};

use crate::error::{ConfigConflictError, ConfigError, Result};

/// Where a config element was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfigLevel {
    Global,
    Shared,
    Step,
}

impl ConfigLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigLevel::Global => "global",
            ConfigLevel::Shared => "shared",
            ConfigLevel::Step => "step",
        }
    }
}

impl fmt::Display for ConfigLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a config element. An env var and a file may share a name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfigKey {
    Env(String),
    File(String),
}

impl ConfigKey {
    pub fn name(&self) -> &str {
        match self {
            ConfigKey::Env(name) | ConfigKey::File(name) => name,
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigKey::Env(name) => write!(f, "env:{}", name),
            ConfigKey::File(name) => write!(f, "file:{}", name),
        }
    }
}

/// Resolved value of a config element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    Literal(String),
    SecretKey(KeyRef),
    ConfigMapKey(KeyRef),
}

/// A validated config element together with the level it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    pub key: ConfigKey,
    pub level: ConfigLevel,
    pub value: ConfigValue,
    /// Mount path, set for file entries only.
    pub path: Option<String>,
}

impl ConfigEntry {
    /// Validate a manifest element declared on `level`.
    pub fn from_element(level: ConfigLevel, element: &ConfigElement) -> Result<Self> {
        let invalid = |reason: &str| ConfigError::InvalidElement {
            name: element.name.clone(),
            reason: reason.to_string(),
        };

        if element.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }

        let value = match (&element.value, &element.value_from) {
            (Some(literal), None) => ConfigValue::Literal(literal.clone()),
            (None, Some(source)) => {
                match (&source.secret_key_ref, &source.config_map_key_ref) {
                    (Some(secret), None) => ConfigValue::SecretKey(secret.clone()),
                    (None, Some(config_map)) => ConfigValue::ConfigMapKey(config_map.clone()),
                    _ => {
                        return Err(invalid(
                            "valueFrom needs exactly one of secretKeyRef and configMapKeyRef",
                        ));
                    }
                }
            }
            (Some(_), Some(_)) => return Err(invalid("value and valueFrom are mutually exclusive")),
            (None, None) => return Err(invalid("one of value and valueFrom is required")),
        };

        let (key, path) = match element.kind {
            ConfigType::Env => (ConfigKey::Env(element.name.clone()), None),
            ConfigType::File => {
                let path = element
                    .path
                    .as_deref()
                    .filter(|p| !p.trim().is_empty())
                    .ok_or_else(|| invalid("file elements need a path"))?;
                (ConfigKey::File(element.name.clone()), Some(path.to_string()))
            }
        };

        Ok(Self {
            key,
            level,
            value,
            path,
        })
    }
}

/// Config elements of one step, grouped by level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayeredConfig {
    levels: BTreeMap<ConfigLevel, BTreeMap<ConfigKey, ConfigEntry>>,
}

impl LayeredConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one element on `level`.
    ///
    /// Fails with [`ConfigConflictError`] if the level already has an element
    /// with the same key.
    pub fn insert(&mut self, level: ConfigLevel, element: &ConfigElement) -> Result<()> {
        let entry = ConfigEntry::from_element(level, element)?;
        let layer = self.levels.entry(level).or_default();
        if layer.contains_key(&entry.key) {
            return Err(ConfigConflictError {
                level,
                key: entry.key,
            }
            .into());
        }
        layer.insert(entry.key.clone(), entry);
        Ok(())
    }

    /// Add every element of `elements` on `level`.
    pub fn extend(&mut self, level: ConfigLevel, elements: &[ConfigElement]) -> Result<()> {
        for element in elements {
            self.insert(level, element)?;
        }
        Ok(())
    }

    /// Builder form of [`LayeredConfig::extend`].
    pub fn with_layer(mut self, level: ConfigLevel, elements: &[ConfigElement]) -> Result<Self> {
        self.extend(level, elements)?;
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.levels.values().all(BTreeMap::is_empty)
    }

    /// The entry that wins for `key`, if any level declares it.
    pub fn get(&self, key: &ConfigKey) -> Option<&ConfigEntry> {
        self.levels.values().rev().find_map(|layer| layer.get(key))
    }

    /// Flatten all levels; more specific levels win. Ordered by key.
    pub fn effective(&self) -> Vec<ConfigEntry> {
        let mut merged: BTreeMap<&ConfigKey, &ConfigEntry> = BTreeMap::new();
        for layer in self.levels.values() {
            for (key, entry) in layer {
                merged.insert(key, entry);
            }
        }
        merged.into_values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn literal(entry: &ConfigEntry) -> &str {
        match &entry.value {
            ConfigValue::Literal(v) => v,
            other => panic!("expected literal, got {:?}", other),
        }
    }

    #[test]
    fn test_step_overrides_shared_overrides_global() {
        let config = LayeredConfig::new()
            .with_layer(
                ConfigLevel::Global,
                &[
                    ConfigElement::env("PROVIDER", "aws"),
                    ConfigElement::env("REGION", "eu-west-1"),
                ],
            )
            .unwrap()
            .with_layer(ConfigLevel::Shared, &[ConfigElement::env("PROVIDER", "gcp")])
            .unwrap()
            .with_layer(ConfigLevel::Step, &[ConfigElement::env("REGION", "us-east-1")])
            .unwrap();

        let effective = config.effective();
        assert_eq!(effective.len(), 2);
        assert_eq!(effective[0].key, ConfigKey::Env("PROVIDER".into()));
        assert_eq!(literal(&effective[0]), "gcp");
        assert_eq!(effective[0].level, ConfigLevel::Shared);
        assert_eq!(literal(&effective[1]), "us-east-1");
        assert_eq!(effective[1].level, ConfigLevel::Step);

        let region = config.get(&ConfigKey::Env("REGION".into())).unwrap();
        assert_eq!(region.level, ConfigLevel::Step);
    }

    #[test]
    fn test_same_level_duplicate_conflicts() {
        let mut config = LayeredConfig::new();
        config
            .insert(ConfigLevel::Shared, &ConfigElement::env("A", "1"))
            .unwrap();
        let err = config
            .insert(ConfigLevel::Shared, &ConfigElement::env("A", "2"))
            .unwrap_err();
        match err {
            ConfigError::Conflict(conflict) => {
                assert_eq!(conflict.level, ConfigLevel::Shared);
                assert_eq!(conflict.key, ConfigKey::Env("A".into()));
                assert!(conflict.to_string().contains("env:A"));
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_env_and_file_with_same_name_coexist() {
        let config = LayeredConfig::new()
            .with_layer(
                ConfigLevel::Global,
                &[
                    ConfigElement::env("creds", "x"),
                    ConfigElement::file("creds", "/tmp/creds", "y"),
                ],
            )
            .unwrap();
        assert_eq!(config.effective().len(), 2);
    }

    #[test]
    fn test_secret_value() {
        let mut config = LayeredConfig::new();
        config
            .insert(
                ConfigLevel::Step,
                &ConfigElement::file_from_secret("token", "/etc/token", "tok", "value"),
            )
            .unwrap();
        let entry = &config.effective()[0];
        assert_eq!(entry.value, ConfigValue::SecretKey(KeyRef::new("tok", "value")));
        assert_eq!(entry.path.as_deref(), Some("/etc/token"));
    }

    #[test]
    fn test_invalid_elements() {
        let mut empty_name = ConfigElement::env("", "x");
        empty_name.name = "  ".into();

        let mut both = ConfigElement::env_from_secret("A", "s", "k");
        both.value = Some("x".into());

        let mut neither = ConfigElement::env("B", "x");
        neither.value = None;

        let mut no_path = ConfigElement::file("C", "/x", "y");
        no_path.path = None;

        for element in [empty_name, both, neither, no_path] {
            let err = ConfigEntry::from_element(ConfigLevel::Global, &element).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidElement { .. }),
                "unexpected error {:?}",
                err
            );
        }
    }

    #[test]
    fn test_empty() {
        let config = LayeredConfig::new();
        assert!(config.is_empty());
        assert!(config.effective().is_empty());
    }
}
