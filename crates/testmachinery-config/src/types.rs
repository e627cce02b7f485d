//! Controller settings mapping to the TOML schema.
//!
//! ```toml
//! [workflow]
//! namespace = "testmachinery"
//! image_pull_secrets = ["registry-creds"]
//! default_ttl_seconds = 86400
//! prepare_image = "europe-docker.pkg.dev/testmachinery/prepare:latest"
//!
//! [sync]
//! conflict_policy = "most_severe"
//! poll_interval_secs = 5
//!
//! [logging]
//! directory = "/var/log/testmachinery"
//! file = true
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use testmachinery_types::Phase;

/// Retention of finished workflows when the Testrun does not set one.
pub const DEFAULT_TTL_SECONDS: u32 = 24 * 60 * 60;

/// Image running the synthesized prepare steps.
pub const DEFAULT_PREPARE_IMAGE: &str = "europe-docker.pkg.dev/testmachinery/prepare:latest";

/// Namespace workflows are created in when neither the Testrun nor the
/// settings name one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Poll interval of `sync --watch`.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Settings
// ─────────────────────────────────────────────────────────────────────────────

/// Root settings structure.
///
/// All sections are optional so partial files (e.g. a project-local override)
/// can be loaded and merged on top of the user file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub workflow: Option<WorkflowSettings>,
    pub sync: Option<SyncSettings>,
    pub logging: Option<LoggingSettings>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another settings layer on top of this one, section by section.
    pub fn merge(&mut self, other: Settings) {
        if other.workflow.is_some() {
            self.workflow = other.workflow;
        }

        if other.sync.is_some() {
            self.sync = other.sync;
        }

        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// Workflow section, defaults when absent.
    pub fn workflow(&self) -> WorkflowSettings {
        self.workflow.clone().unwrap_or_default()
    }

    /// Sync section, defaults when absent.
    pub fn sync(&self) -> SyncSettings {
        self.sync.clone().unwrap_or_default()
    }

    /// Logging section, defaults when absent.
    pub fn logging(&self) -> LoggingSettings {
        self.logging.clone().unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Workflow Settings
// ─────────────────────────────────────────────────────────────────────────────

/// How generated workflows are rendered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    /// Namespace of the generated workflow when the Testrun has none.
    pub namespace: String,
    /// Image pull secrets attached to every workflow.
    pub image_pull_secrets: Vec<String>,
    /// TTL used when the Testrun does not set `ttlSecondsAfterFinished`.
    pub default_ttl_seconds: u32,
    /// Image of the synthesized prepare steps.
    pub prepare_image: String,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            image_pull_secrets: Vec::new(),
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
            prepare_image: DEFAULT_PREPARE_IMAGE.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sync Settings
// ─────────────────────────────────────────────────────────────────────────────

/// How the status synchronizer resolves conflicting terminal observations of
/// the same template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Error > Failed > Skipped > Succeeded.
    #[default]
    MostSevere,
    /// Succeeded > Skipped > Failed > Error. For engines that keep failed
    /// retry attempts next to the final successful one.
    LeastSevere,
}

impl ConflictPolicy {
    /// Whether `candidate` should replace `current`; both must be terminal.
    pub fn prefers(&self, candidate: Phase, current: Phase) -> bool {
        match (candidate.severity(), current.severity()) {
            (Some(c), Some(p)) => match self {
                ConflictPolicy::MostSevere => c > p,
                ConflictPolicy::LeastSevere => c < p,
            },
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::MostSevere => "most_severe",
            ConflictPolicy::LeastSevere => "least_severe",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace('-', "_").as_str() {
            "most_severe" => Ok(ConflictPolicy::MostSevere),
            "least_severe" => Ok(ConflictPolicy::LeastSevere),
            other => Err(format!(
                "unknown conflict policy '{}' (expected most_severe or least_severe)",
                other
            )),
        }
    }
}

/// Status synchronization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub conflict_policy: ConflictPolicy,
    /// Seconds between two synchronizations in watch mode.
    pub poll_interval_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::default(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging Settings
// ─────────────────────────────────────────────────────────────────────────────

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Directory of the JSON log files. Platform data dir when unset.
    pub directory: Option<PathBuf>,
    /// Whether to write the rolling JSON log file at all.
    pub file: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: None,
            file: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
