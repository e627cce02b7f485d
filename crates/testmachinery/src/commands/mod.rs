//! CLI command handlers.

pub mod compile;
pub mod config;
pub mod reconcile;
pub mod sync;
pub mod validate;

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use serde::Serialize;
use testmachinery_config::Settings;
use testmachinery_flow::{LocalLocations, Locations};
use testmachinery_types::Testrun;
use testmachinery_types::manifest::{self, Format};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
    /// Merged settings from all discovered layers.
    pub settings: Settings,
}

impl Context {
    /// Format used when printing manifests to stdout.
    pub fn output_format(&self) -> Format {
        if self.json_output {
            Format::Json
        } else {
            Format::Yaml
        }
    }
}

/// Load a Testrun manifest.
pub fn load_testrun(path: &Path) -> Result<Testrun> {
    manifest::load(path).with_context(|| format!("Failed to load testrun {}", path.display()))
}

/// Resolvers for a Testrun: its declared locations, then `extra_dirs`.
///
/// Relative `hostPath` locations are taken relative to the manifest.
pub fn locations_for(testrun: &Testrun, manifest_path: &Path, extra_dirs: &[PathBuf]) -> Result<Locations> {
    let base_dir = manifest_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut locations = Locations::from_specs(&testrun.spec.locations, base_dir)?;
    for dir in extra_dirs {
        locations.push(
            LocalLocations::load(dir)
                .with_context(|| format!("Failed to load test definitions from {}", dir.display()))?,
        );
    }
    Ok(locations)
}

/// Write `value` to `path`, or print it when no path is given.
pub fn emit<T: Serialize>(value: &T, path: Option<&Path>, ctx: &Context) -> Result<()> {
    match path {
        Some(path) => manifest::save(value, path)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => {
            let text = manifest::to_string(value, ctx.output_format())?;
            println!("{}", text.trim_end());
        }
    }
    Ok(())
}
