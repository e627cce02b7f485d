//! Error types for flow compilation and status synchronization.

use testmachinery_config::{ConfigConflictError, ConfigError};
use testmachinery_types::StepKey;
use thiserror::Error;

/// Result type for flow operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort compilation of a Testrun.
#[derive(Debug, Error)]
pub enum Error {
    /// The Testrun's flow is malformed.
    #[error("Invalid testrun: {0}")]
    Specification(#[from] SpecificationError),

    /// Two config elements share a key on the same level.
    #[error("Config conflict: {0}")]
    ConfigConflict(#[from] ConfigConflictError),

    /// A config element is malformed.
    #[error("Invalid config: {0}")]
    Config(ConfigError),

    /// Test definition lookup failed for a reason other than not-found.
    #[error("Location resolver failed: {0}")]
    Resolver(#[from] ResolveError),

    /// Credentials could not be derived from the Testrun.
    #[error("Credentials error: {0}")]
    Credentials(String),
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Conflict(conflict) => Error::ConfigConflict(conflict),
            other => Error::Config(other),
        }
    }
}

impl Error {
    /// Machine-readable reason recorded on the `Compiled` condition.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Specification(_) | Error::Config(_) => "SpecificationError",
            Error::ConfigConflict(_) => "ConfigConflict",
            Error::Resolver(_) => "ResolverError",
            Error::Credentials(_) => "CredentialError",
        }
    }
}

/// Structural problems in a test flow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecificationError {
    #[error("flow '{flow}' has no branches")]
    EmptyFlow { flow: String },

    #[error("flow '{0}' is declared more than once")]
    DuplicateFlow(String),

    #[error("flow '{flow}': branch name cannot be empty")]
    EmptyBranchName { flow: String },

    #[error("flow '{flow}': duplicate branch '{branch}'")]
    DuplicateBranch { flow: String, branch: String },

    #[error("flow '{flow}': branch '{branch}' has no steps")]
    EmptyBranch { flow: String, branch: String },

    #[error("flow '{flow}': duplicate step '{step}' in branch '{branch}'")]
    DuplicateStep {
        flow: String,
        branch: String,
        step: String,
    },

    #[error("flow '{flow}': position {position} is used by more than one step")]
    DuplicatePosition { flow: String, position: String },

    #[error("flow '{flow}': step '{step}' references unknown test definition '{definition}'")]
    UnknownDefinition {
        flow: String,
        step: String,
        definition: String,
    },

    #[error("flow '{flow}': step '{step}' depends on unknown step '{target}'")]
    UnknownDependency {
        flow: String,
        step: String,
        target: String,
    },

    #[error("flow '{flow}': cycle detected in step dependencies")]
    Cycle { flow: String },

    /// `success`/`error` conditions read the workflow result, which only
    /// exists once the exit handler runs.
    #[error("flow '{flow}': step '{step}' has condition '{condition}', only allowed in the exit flow")]
    ConditionOutsideExitFlow {
        flow: String,
        step: String,
        condition: String,
    },
}

/// Errors from a [`TestDefinitionResolver`](crate::TestDefinitionResolver).
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No location knows the definition.
    #[error("test definition not found: {0}")]
    NotFound(String),

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    /// Two files of one location define the same name.
    #[error("test definition '{name}' is defined twice (second in {path})")]
    Duplicate { name: String, path: String },
}

/// A step or template that could not be joined during synchronization.
///
/// Never fatal: the affected step keeps its previous phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataConsistencyWarning {
    /// A template carries some, but not all, of the join annotations.
    #[error("template '{template}' is only partially annotated")]
    PartialAnnotations { template: String },

    /// Two templates carry the same join key; the first one wins.
    #[error("templates '{kept}' and '{ignored}' both claim step {key}")]
    DuplicateTemplate {
        key: StepKey,
        kept: String,
        ignored: String,
    },

    /// A status step has an incomplete position map.
    #[error("status step [{row}][{column}] ('{testdefinition}') has no flow or position")]
    MalformedStep {
        row: usize,
        column: usize,
        testdefinition: String,
    },

    /// No template carries the step's join key.
    #[error("no template found for step {key}")]
    MissingTemplate { key: StepKey },
}

impl DataConsistencyWarning {
    /// The step key the warning is about, if it names one.
    pub fn step_key(&self) -> Option<&StepKey> {
        match self {
            DataConsistencyWarning::DuplicateTemplate { key, .. }
            | DataConsistencyWarning::MissingTemplate { key } => Some(key),
            _ => None,
        }
    }
}
