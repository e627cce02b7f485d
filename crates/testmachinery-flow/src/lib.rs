//! Testrun flow compilation and status synchronization.
//!
//! A Testrun declares a main flow and an optional exit flow, each a list of
//! branches of steps. [`compile`] turns both flows into annotated templates
//! and an initial step status tree; [`CompiledTestrun::workflow`] assembles
//! them into one executable [`Workflow`](testmachinery_types::Workflow).
//! While the workflow runs, [`sync_status`] folds the engine's node phases
//! back into the step tree, joining on the `(flow, position, testdefinition)`
//! key each template carries.
//!
//! [`Reconciler`] combines both into a single idempotent pass.

pub mod compile;
pub mod credentials;
pub mod error;
pub mod locations;
pub mod prepare;
pub mod reconcile;
pub mod sync;
pub mod testflow;
pub mod workflow;

pub use compile::{CompileContext, CompiledTestrun, compile, workflow_name};
pub use credentials::{
    CredentialMount, CredentialMounts, CredentialProvider, Credentials, KUBECONFIG_PATH,
    SpecCredentialProvider,
};
pub use error::{DataConsistencyWarning, Error, ResolveError, Result, SpecificationError};
pub use locations::{InMemoryLocations, LocalLocations, Locations, TestDefinitionResolver};
pub use reconcile::{ReconcileOutcome, Reconciler};
pub use sync::{SyncReport, sync_status, sync_steps};
pub use testflow::{CompiledFlow, CompiledStep, EXIT_FLOW_ID, FlowKind, MAIN_FLOW_ID, StepRole};
pub use workflow::{ENTRYPOINT, EXIT_HANDLER, assemble};
