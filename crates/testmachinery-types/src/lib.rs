//! Shared types for Testmachinery.
//!
//! The declarative [`Testrun`] resource, its step status tree, resolved
//! [`TestDefinition`]s and the executable [`Workflow`] object model. The
//! [`position`] module defines the `(flow, position, testdefinition-name)` join
//! key that ties compiled templates to status entries.

pub mod config;
pub mod error;
pub mod manifest;
pub mod position;
pub mod status;
pub mod testdefinition;
pub mod testrun;
pub mod workflow;

pub use config::{ConfigElement, ConfigSource, ConfigType, KeyRef};
pub use error::{ManifestError, PositionError};
pub use position::{ANNOTATION_FLOW, ANNOTATION_POSITION, ANNOTATION_TESTDEF_NAME, Position, StepKey};
pub use status::{
    Condition, ConditionStatus, ConditionType, Phase, StepStatus, StepTestDefinition,
    TestrunStatus,
};
pub use testdefinition::TestDefinition;
pub use testrun::{
    FlowBranch, KubeconfigSource, LocationSpec, ObjectMeta, ProjectedToken,
    SYSTEM_UNDER_TEST_KUBECONFIG, StepCondition, StepRef, StepSpec, TestFlow, Testrun,
    TestrunSpec,
};
pub use workflow::{NodePhase, NodeStatus, Template, Workflow, WorkflowStatus};
