//! The Testrun resource: declarative test flow plus its status.
//!
//! ```yaml
//! apiVersion: testmachinery.io/v1beta1
//! kind: Testrun
//! metadata:
//!   name: integration-1
//!   namespace: default
//! spec:
//!   ttlSecondsAfterFinished: 3600
//!   config:
//!     - { type: env, name: PROVIDER, value: aws }
//!   kubeconfigs:
//!     shoot:
//!       secret: { name: shoot-kubeconfig, key: kubeconfig }
//!   locations:
//!     - { type: local, hostPath: /testdefs }
//!   testflow:
//!     - name: create
//!       steps:
//!         - definition: create-shoot
//!     - name: tests
//!       steps:
//!         - definition: conformance
//!           dependsOn: [{ branch: create, step: create-shoot }]
//!   onExit:
//!     - name: cleanup
//!       steps:
//!         - definition: delete-shoot
//!           condition: always
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigElement, KeyRef};
use crate::status::TestrunStatus;
use crate::testdefinition::TestDefinition;

/// Default API version written by this crate.
pub const API_VERSION: &str = "testmachinery.io/v1beta1";

/// Kind of the Testrun resource.
pub const KIND: &str = "Testrun";

/// Name of the credentials identifying the system under test.
///
/// Mounts with this name are usable by untrusted steps.
pub const SYSTEM_UNDER_TEST_KUBECONFIG: &str = "shoot";

/// A Testrun resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Testrun {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_kind")]
    pub kind: String,

    pub metadata: ObjectMeta,

    pub spec: TestrunSpec,

    #[serde(default)]
    pub status: TestrunStatus,
}

fn default_api_version() -> String {
    API_VERSION.to_string()
}

fn default_kind() -> String {
    KIND.to_string()
}

impl Testrun {
    /// Create a Testrun with an empty status.
    pub fn new(name: impl Into<String>, spec: TestrunSpec) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta {
                name: name.into(),
                ..Default::default()
            },
            spec,
            status: TestrunStatus::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Namespace of the Testrun, `default` when unset.
    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("default")
    }
}

/// Object metadata subset used by the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Declarative part of a Testrun.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestrunSpec {
    /// Main test flow.
    #[serde(default)]
    pub testflow: TestFlow,

    /// Flow executed once the main flow has finished, whatever its outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_exit: Option<TestFlow>,

    /// Global configuration visible to every step.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config: Vec<ConfigElement>,

    /// Retention of the generated workflow after completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<u32>,

    /// Cluster credentials by name (e.g. `shoot`, `seed`, `gardener`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kubeconfigs: BTreeMap<String, KubeconfigSource>,

    /// Where test definitions are looked up.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<LocationSpec>,
}

/// Ordered list of flow branches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestFlow(pub Vec<FlowBranch>);

impl TestFlow {
    pub fn new(branches: Vec<FlowBranch>) -> Self {
        Self(branches)
    }

    pub fn branches(&self) -> &[FlowBranch] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total number of declared steps across all branches.
    pub fn step_count(&self) -> usize {
        self.0.iter().map(|b| b.steps.len()).sum()
    }
}

/// A named, ordered sequence of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowBranch {
    pub name: String,

    /// Configuration shared by all steps of this branch.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config: Vec<ConfigElement>,

    pub steps: Vec<StepSpec>,
}

impl FlowBranch {
    pub fn new(name: impl Into<String>, steps: Vec<StepSpec>) -> Self {
        Self {
            name: name.into(),
            config: Vec::new(),
            steps,
        }
    }
}

/// One step of a branch, referencing a test definition by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSpec {
    /// Step name, unique within the branch. Defaults to the definition name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Name of the test definition to run.
    pub definition: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config: Vec<ConfigElement>,

    /// Explicit predecessors. Replaces the default "previous step in branch".
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<StepRef>,

    /// Keep the flow going when this step fails.
    #[serde(default)]
    pub continue_on_error: bool,

    /// When the step runs relative to the outcome of the main flow.
    #[serde(default)]
    pub condition: StepCondition,
}

impl StepSpec {
    pub fn new(definition: impl Into<String>) -> Self {
        Self {
            name: None,
            definition: definition.into(),
            config: Vec::new(),
            depends_on: Vec::new(),
            continue_on_error: false,
            condition: StepCondition::Always,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn depends_on(mut self, dep: StepRef) -> Self {
        self.depends_on.push(dep);
        self
    }

    /// Effective step name.
    pub fn step_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.definition)
    }
}

/// Reference to another step, optionally in another branch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepRef {
    /// Branch of the referenced step; the referencing step's branch when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    pub step: String,
}

impl StepRef {
    pub fn local(step: impl Into<String>) -> Self {
        Self {
            branch: None,
            step: step.into(),
        }
    }

    pub fn in_branch(branch: impl Into<String>, step: impl Into<String>) -> Self {
        Self {
            branch: Some(branch.into()),
            step: step.into(),
        }
    }
}

/// Outcome of the main flow a step is conditioned on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepCondition {
    #[default]
    Always,
    Success,
    Error,
}

impl StepCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepCondition::Always => "always",
            StepCondition::Success => "success",
            StepCondition::Error => "error",
        }
    }

    /// Engine expression guarding the step, `None` for unconditional steps.
    pub fn when_expression(&self) -> Option<&'static str> {
        match self {
            StepCondition::Always => None,
            StepCondition::Success => Some("{{workflow.status}} == Succeeded"),
            StepCondition::Error => Some("{{workflow.status}} != Succeeded"),
        }
    }
}

/// Source of a named kubeconfig.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KubeconfigSource {
    /// Kubeconfig stored in a secret key.
    Secret(KeyRef),
    /// Short-lived projected service-account token.
    ServiceAccountToken(ProjectedToken),
}

/// Projected service-account token request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectedToken {
    /// Secret holding the kubeconfig skeleton the token is injected into.
    pub kubeconfig_secret: KeyRef,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_seconds: Option<u32>,
}

/// Where test definitions are looked up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LocationSpec {
    /// Directory of test definition files on the node.
    Local {
        #[serde(rename = "hostPath")]
        host_path: PathBuf,
    },
    /// Test definitions embedded in the Testrun.
    Inline { definitions: Vec<TestDefinition> },
}
