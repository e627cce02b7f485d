//! Test definition lookup.
//!
//! A Testrun names test definitions only by name; the [`TestDefinitionResolver`]
//! turns a name into the container to run. Definitions come from inline
//! manifests ([`InMemoryLocations`]) or from directories of `*.toml` / `*.yaml`
//! files ([`LocalLocations`]). [`Locations`] chains several resolvers in
//! declaration order.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use testmachinery_types::{LocationSpec, TestDefinition};
use tracing::debug;

use crate::error::ResolveError;

/// Looks up test definitions by name.
pub trait TestDefinitionResolver {
    /// Resolve `name`, returning [`ResolveError::NotFound`] if unknown.
    fn resolve(&self, name: &str) -> Result<TestDefinition, ResolveError>;
}

impl<T: TestDefinitionResolver + ?Sized> TestDefinitionResolver for Box<T> {
    fn resolve(&self, name: &str) -> Result<TestDefinition, ResolveError> {
        (**self).resolve(name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory
// ─────────────────────────────────────────────────────────────────────────────

/// Definitions held in memory, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLocations {
    definitions: BTreeMap<String, TestDefinition>,
}

impl InMemoryLocations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a definition.
    pub fn insert(&mut self, definition: TestDefinition) {
        self.definitions.insert(definition.name.clone(), definition);
    }

    pub fn with(mut self, definition: TestDefinition) -> Self {
        self.insert(definition);
        self
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }
}

impl FromIterator<TestDefinition> for InMemoryLocations {
    fn from_iter<I: IntoIterator<Item = TestDefinition>>(iter: I) -> Self {
        let mut locations = Self::new();
        for definition in iter {
            locations.insert(definition);
        }
        locations
    }
}

impl TestDefinitionResolver for InMemoryLocations {
    fn resolve(&self, name: &str) -> Result<TestDefinition, ResolveError> {
        self.definitions
            .get(name)
            .cloned()
            .ok_or_else(|| ResolveError::NotFound(name.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Local directory
// ─────────────────────────────────────────────────────────────────────────────

/// Definitions loaded from a directory on the node.
///
/// Every loaded definition records the directory as its `origin`, which makes
/// the compiler mount the directory into the step at `/src`.
#[derive(Debug, Clone)]
pub struct LocalLocations {
    dir: PathBuf,
    definitions: InMemoryLocations,
}

impl LocalLocations {
    /// Load every `*.toml`, `*.yaml` and `*.yml` file directly under `dir`.
    ///
    /// Files are read in name order. Two files defining the same name fail.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self, ResolveError> {
        let dir = dir.into();
        let entries = std::fs::read_dir(&dir).map_err(|e| ResolveError::Read {
            path: dir.display().to_string(),
            source: e,
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && definition_format(p).is_some())
            .collect();
        files.sort();

        let mut definitions = InMemoryLocations::new();
        for path in files {
            let mut definition = parse_definition_file(&path)?;
            if definitions.definitions.contains_key(&definition.name) {
                return Err(ResolveError::Duplicate {
                    name: definition.name,
                    path: path.display().to_string(),
                });
            }
            definition.origin = Some(dir.clone());
            definitions.insert(definition);
        }

        debug!(
            dir = %dir.display(),
            count = definitions.len(),
            "Loaded local test definitions"
        );

        Ok(Self { dir, definitions })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl TestDefinitionResolver for LocalLocations {
    fn resolve(&self, name: &str) -> Result<TestDefinition, ResolveError> {
        self.definitions.resolve(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DefinitionFormat {
    Toml,
    Yaml,
}

fn definition_format(path: &Path) -> Option<DefinitionFormat> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Some(DefinitionFormat::Toml),
        Some("yaml") | Some("yml") => Some(DefinitionFormat::Yaml),
        _ => None,
    }
}

/// Parse a single test definition file.
pub fn parse_definition_file(path: &Path) -> Result<TestDefinition, ResolveError> {
    let parse_err = |reason: String| ResolveError::Parse {
        path: path.display().to_string(),
        reason,
    };

    let format = definition_format(path)
        .ok_or_else(|| parse_err("unsupported file extension".to_string()))?;
    let content = std::fs::read_to_string(path).map_err(|e| ResolveError::Read {
        path: path.display().to_string(),
        source: e,
    })?;

    let definition: TestDefinition = match format {
        DefinitionFormat::Toml => toml::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
        DefinitionFormat::Yaml => {
            serde_yaml::from_str(&content).map_err(|e| parse_err(e.to_string()))?
        }
    };

    if definition.name.trim().is_empty() {
        return Err(parse_err("test definition name cannot be empty".to_string()));
    }
    if definition.image.trim().is_empty() {
        return Err(parse_err(format!(
            "test definition '{}' has no image",
            definition.name
        )));
    }
    Ok(definition)
}

// ─────────────────────────────────────────────────────────────────────────────
// Chained
// ─────────────────────────────────────────────────────────────────────────────

/// Several resolvers consulted in order; the first hit wins.
#[derive(Default)]
pub struct Locations {
    resolvers: Vec<Box<dyn TestDefinitionResolver + Send + Sync>>,
}

impl Locations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build resolvers for the locations declared in a Testrun.
    ///
    /// Relative `hostPath`s are taken relative to `base_dir`.
    pub fn from_specs(specs: &[LocationSpec], base_dir: &Path) -> Result<Self, ResolveError> {
        let mut locations = Self::new();
        for spec in specs {
            match spec {
                LocationSpec::Local { host_path } => {
                    let dir = if host_path.is_relative() {
                        base_dir.join(host_path)
                    } else {
                        host_path.clone()
                    };
                    locations.push(LocalLocations::load(dir)?);
                }
                LocationSpec::Inline { definitions } => {
                    locations.push(definitions.iter().cloned().collect::<InMemoryLocations>());
                }
            }
        }
        Ok(locations)
    }

    pub fn push(&mut self, resolver: impl TestDefinitionResolver + Send + Sync + 'static) {
        self.resolvers.push(Box::new(resolver));
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

impl TestDefinitionResolver for Locations {
    fn resolve(&self, name: &str) -> Result<TestDefinition, ResolveError> {
        for resolver in &self.resolvers {
            match resolver.resolve(name) {
                Err(ResolveError::NotFound(_)) => continue,
                other => return other,
            }
        }
        Err(ResolveError::NotFound(name.to_string()))
    }
}
