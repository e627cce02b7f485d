//! Test definitions: the container a step runs.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A resolved test definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDefinition {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    pub image: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Hard limit for the step's runtime, enforced by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_deadline_seconds: Option<u64>,

    /// Untrusted definitions only see credentials of the system under test.
    #[serde(default)]
    pub untrusted: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,

    /// Directory the definition was loaded from, if it came from a local location.
    #[serde(skip)]
    pub origin: Option<PathBuf>,
}

impl TestDefinition {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            image: image.into(),
            command: Vec::new(),
            args: Vec::new(),
            active_deadline_seconds: None,
            untrusted: false,
            labels: Vec::new(),
            origin: None,
        }
    }

    pub fn with_command(mut self, command: &[&str]) -> Self {
        self.command = command.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn untrusted(mut self) -> Self {
        self.untrusted = true;
        self
    }
}
