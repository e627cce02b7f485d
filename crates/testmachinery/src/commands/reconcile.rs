//! Reconcile command - one controller pass over a Testrun stored on disk.
//!
//! Without a workflow the Testrun is compiled and the workflow written out.
//! With one, its runtime status is synchronized into the Testrun.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use chrono::Utc;
use clap::Args;
use serde::Serialize;
use testmachinery_config::ConflictPolicy;
use testmachinery_flow::{CompileContext, ReconcileOutcome, Reconciler, SpecCredentialProvider};
use testmachinery_types::manifest;
use testmachinery_types::{ConditionType, Phase, Workflow};

use super::{Context, emit, load_testrun, locations_for};

/// Arguments for the reconcile command.
#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Testrun manifest; updated in place
    pub testrun: PathBuf,

    /// Workflow with its runtime status, if one was already submitted
    #[arg(long)]
    pub workflow: Option<PathBuf>,

    /// Where to write a newly compiled workflow (default: stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Additional directories of test definitions
    #[arg(short = 'd', long = "definitions")]
    pub definitions: Vec<PathBuf>,

    /// Precedence between conflicting terminal phases (most_severe, least_severe)
    #[arg(long)]
    pub policy: Option<ConflictPolicy>,
}

/// Reconcile result for JSON output.
#[derive(Debug, Serialize)]
struct ReconcileOutput {
    testrun: String,
    outcome: &'static str,
    phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

/// Run the reconcile command.
pub async fn run(args: ReconcileArgs, ctx: &Context) -> Result<()> {
    let mut testrun = load_testrun(&args.testrun)?;
    let locations = locations_for(&testrun, &args.testrun, &args.definitions)?;

    let workflow: Option<Workflow> = match &args.workflow {
        Some(path) if path.exists() => Some(
            manifest::load(path)
                .with_context(|| format!("Failed to load workflow {}", path.display()))?,
        ),
        _ => None,
    };

    let settings = ctx.settings.workflow();
    let policy = args
        .policy
        .unwrap_or_else(|| ctx.settings.sync().conflict_policy);
    let provider = SpecCredentialProvider;
    let reconciler = Reconciler::new(
        CompileContext::new(&locations, &provider).with_settings(&settings),
        &settings.namespace,
    )
    .with_pull_secrets(&settings.image_pull_secrets)
    .with_policy(policy);

    let outcome = reconciler.reconcile(&mut testrun, workflow.as_ref(), Utc::now());

    let (label, reason) = match &outcome {
        ReconcileOutcome::Compiled(wf) => {
            emit(&**wf, args.output.as_deref(), ctx)?;
            ("compiled", None)
        }
        ReconcileOutcome::Failed => (
            "failed",
            testrun
                .status
                .condition(ConditionType::Compiled)
                .map(|c| format!("{}: {}", c.reason, c.message)),
        ),
        ReconcileOutcome::Synced(report) => (
            "synced",
            (!report.is_consistent()).then(|| {
                report
                    .warnings
                    .iter()
                    .map(|w| w.to_string())
                    .collect::<Vec<_>>()
                    .join("; ")
            }),
        ),
        ReconcileOutcome::Finished => ("finished", None),
    };

    if !matches!(outcome, ReconcileOutcome::Finished) {
        emit(&testrun, Some(&args.testrun), ctx)?;
    }

    // The workflow itself goes to stdout when no output file is given.
    let stdout_taken = matches!(outcome, ReconcileOutcome::Compiled(_)) && args.output.is_none();
    if ctx.json_output && !stdout_taken {
        let output = ReconcileOutput {
            testrun: testrun.name().to_string(),
            outcome: label,
            phase: testrun.status.phase,
            reason,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        eprintln!("{}: {} ({})", testrun.name(), label, testrun.status.phase);
        if let Some(reason) = &reason {
            eprintln!("  {}", reason);
        }
    }

    if matches!(outcome, ReconcileOutcome::Failed) {
        anyhow::bail!("Failed to compile testrun {}", testrun.name());
    }
    Ok(())
}
