//! Compile command - renders a Testrun as an executable workflow.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use testmachinery_flow::{CompileContext, SpecCredentialProvider, compile, workflow_name};
use tracing::info;

use super::{Context, emit, load_testrun, locations_for};

/// Arguments for the compile command.
#[derive(Args, Debug)]
pub struct CompileArgs {
    /// Testrun manifest (YAML or JSON)
    pub testrun: PathBuf,

    /// Additional directories of test definitions
    #[arg(short = 'd', long = "definitions")]
    pub definitions: Vec<PathBuf>,

    /// Write the workflow to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Namespace of the workflow (overrides the Testrun and settings)
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Workflow name (default: <testrun>-wf)
    #[arg(long)]
    pub name: Option<String>,

    /// Also write the Testrun with its initialized step status back to its file
    #[arg(long)]
    pub write_status: bool,
}

/// Run the compile command.
pub async fn run(args: CompileArgs, ctx: &Context) -> Result<()> {
    let mut testrun = load_testrun(&args.testrun)?;
    let locations = locations_for(&testrun, &args.testrun, &args.definitions)?;

    let settings = ctx.settings.workflow();
    let provider = SpecCredentialProvider;
    let compile_ctx = CompileContext::new(&locations, &provider).with_settings(&settings);
    let compiled = compile(&testrun, &compile_ctx)?;

    let name = args
        .name
        .unwrap_or_else(|| workflow_name(testrun.name()));
    let namespace = args
        .namespace
        .or_else(|| testrun.metadata.namespace.clone())
        .unwrap_or_else(|| settings.namespace.clone());
    let workflow = compiled.workflow(&name, &namespace, &settings.image_pull_secrets);

    info!(
        testrun = testrun.name(),
        workflow = %name,
        steps = compiled.step_count(),
        "Compiled testrun"
    );

    emit(&workflow, args.output.as_deref(), ctx)?;

    if args.write_status {
        testrun.status.steps = compiled.status_rows();
        testrun.status.workflow = Some(name);
        emit(&testrun, Some(&args.testrun), ctx)?;
    }

    Ok(())
}
