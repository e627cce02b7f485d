//! Testrun compilation: both flows, credentials and the resulting workflow.

use testmachinery_config::{DEFAULT_PREPARE_IMAGE, DEFAULT_TTL_SECONDS, WorkflowSettings};
use testmachinery_types::{StepStatus, TestFlow, Testrun, Workflow};
use tracing::debug;

use crate::credentials::{CredentialMounts, CredentialProvider};
use crate::error::Result;
use crate::locations::TestDefinitionResolver;
use crate::prepare;
use crate::testflow::{
    CompiledFlow, EXIT_FLOW_ID, FlowContext, FlowInput, FlowKind, MAIN_FLOW_ID, check_flow_ids,
    compile_flow,
};
use crate::workflow::{WorkflowParams, assemble};

/// Collaborators and defaults used while compiling.
#[derive(Clone, Copy)]
pub struct CompileContext<'a> {
    pub resolver: &'a dyn TestDefinitionResolver,
    pub credentials: &'a dyn CredentialProvider,
    pub prepare_image: &'a str,
    /// TTL used when the Testrun sets none.
    pub default_ttl_seconds: u32,
}

impl<'a> CompileContext<'a> {
    pub fn new(
        resolver: &'a dyn TestDefinitionResolver,
        credentials: &'a dyn CredentialProvider,
    ) -> Self {
        Self {
            resolver,
            credentials,
            prepare_image: DEFAULT_PREPARE_IMAGE,
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
        }
    }

    /// Take the prepare image and default TTL from `settings`.
    pub fn with_settings(mut self, settings: &'a WorkflowSettings) -> Self {
        self.prepare_image = &settings.prepare_image;
        self.default_ttl_seconds = settings.default_ttl_seconds;
        self
    }
}

/// A compiled Testrun, ready to be rendered as a workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledTestrun {
    pub testrun: String,
    pub main: CompiledFlow,
    pub exit: CompiledFlow,
    pub mounts: CredentialMounts,
    pub ttl_seconds: u32,
}

impl CompiledTestrun {
    /// Initial step tree: main flow rows, then exit flow rows.
    pub fn status_rows(&self) -> Vec<Vec<StepStatus>> {
        self.main
            .rows
            .iter()
            .chain(self.exit.rows.iter())
            .cloned()
            .collect()
    }

    pub fn step_count(&self) -> usize {
        self.main.step_count() + self.exit.step_count()
    }

    /// Render the executable workflow.
    pub fn workflow(&self, name: &str, namespace: &str, pull_secrets: &[String]) -> Workflow {
        assemble(
            &self.main,
            &self.exit,
            &self.mounts,
            WorkflowParams {
                name,
                namespace,
                testrun: &self.testrun,
                pull_secrets,
                ttl_seconds: self.ttl_seconds,
            },
        )
    }
}

/// Name of the workflow generated for a Testrun.
pub fn workflow_name(testrun: &str) -> String {
    format!("{}-wf", testrun)
}

/// Compile `testrun` into its main and exit flows.
///
/// Fails without partial output on any structural, config, resolver or
/// credential problem.
pub fn compile(testrun: &Testrun, ctx: &CompileContext<'_>) -> Result<CompiledTestrun> {
    let credentials = ctx.credentials.parse(testrun)?;

    let empty = TestFlow::default();
    let exit_flow = testrun.spec.on_exit.as_ref().unwrap_or(&empty);

    check_flow_ids(&[MAIN_FLOW_ID, EXIT_FLOW_ID])?;

    let flow_ctx = FlowContext {
        resolver: ctx.resolver,
        global_config: &testrun.spec.config,
        testrun_id: testrun.name(),
        credentials: &credentials,
    };
    let main = compile_flow(
        FlowInput {
            id: MAIN_FLOW_ID,
            kind: FlowKind::Main,
            flow: &testrun.spec.testflow,
            bootstrap: prepare::bootstrap(ctx.prepare_image),
            teardown: None,
        },
        &flow_ctx,
    )?;
    let exit = compile_flow(
        FlowInput {
            id: EXIT_FLOW_ID,
            kind: FlowKind::Exit,
            flow: exit_flow,
            bootstrap: prepare::bootstrap(ctx.prepare_image),
            teardown: Some(prepare::teardown(ctx.prepare_image)),
        },
        &flow_ctx,
    )?;

    let compiled = CompiledTestrun {
        testrun: testrun.name().to_string(),
        main,
        exit,
        mounts: credentials.mounts(),
        ttl_seconds: testrun
            .spec
            .ttl_seconds_after_finished
            .unwrap_or(ctx.default_ttl_seconds),
    };

    debug!(
        testrun = testrun.name(),
        steps = compiled.step_count(),
        "Compiled testrun"
    );

    Ok(compiled)
}
