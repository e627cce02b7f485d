//! Sync command - folds a workflow's runtime view back into a Testrun.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, Result};
use chrono::Utc;
use clap::Args;
use console::Style;
use serde::Serialize;
use testmachinery_config::ConflictPolicy;
use testmachinery_flow::{SyncReport, sync_steps};
use testmachinery_types::manifest;
use testmachinery_types::{Phase, Testrun, Workflow};
use tracing::{debug, info};

use super::{Context, emit, load_testrun};

/// Arguments for the sync command.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Testrun manifest; updated in place unless --output is given
    pub testrun: PathBuf,

    /// Workflow with its runtime status (YAML or JSON)
    pub workflow: PathBuf,

    /// Write the updated Testrun here instead
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Precedence between conflicting terminal phases (most_severe, least_severe)
    #[arg(long)]
    pub policy: Option<ConflictPolicy>,

    /// Keep re-reading the workflow until every step is terminal
    #[arg(short, long)]
    pub watch: bool,

    /// Seconds between two synchronizations in watch mode
    #[arg(long)]
    pub interval: Option<u64>,
}

/// Step row for JSON output.
#[derive(Debug, Serialize)]
struct StepOutput {
    step: String,
    phase: Phase,
}

/// Sync result for JSON output.
#[derive(Debug, Serialize)]
struct SyncOutput {
    testrun: String,
    updated: usize,
    warnings: Vec<String>,
    steps: Vec<StepOutput>,
}

/// Run the sync command.
pub async fn run(args: SyncArgs, ctx: &Context) -> Result<()> {
    let settings = ctx.settings.sync();
    let policy = args.policy.unwrap_or(settings.conflict_policy);
    let output = args.output.clone().unwrap_or_else(|| args.testrun.clone());

    let mut testrun = load_testrun(&args.testrun)?;

    if !args.watch {
        let (report, _) = sync_once(&mut testrun, &args.workflow, &output, policy, ctx)?;
        print_report(&testrun, &report, ctx)?;
        return Ok(());
    }

    let secs = args.interval.unwrap_or(settings.poll_interval_secs).max(1);
    let mut interval = tokio::time::interval(Duration::from_secs(secs));
    info!(testrun = testrun.name(), interval_secs = secs, "Watching workflow");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let (report, workflow_phase) =
                    sync_once(&mut testrun, &args.workflow, &output, policy, ctx)?;
                if report.updated > 0 || ctx.verbose {
                    print_report(&testrun, &report, ctx)?;
                }
                if testrun.status.all_steps_terminal() {
                    info!(testrun = testrun.name(), "All steps finished");
                    break;
                }
                // Steps the engine never scheduled stay Init after the run ends.
                if let Some(phase) = workflow_phase.filter(Phase::is_terminal) {
                    info!(testrun = testrun.name(), %phase, "Workflow finished");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping watch");
                break;
            }
        }
    }

    Ok(())
}

/// Re-read the workflow, synchronize and persist the Testrun.
///
/// Also returns the workflow's overall phase, if the engine reported one.
fn sync_once(
    testrun: &mut Testrun,
    workflow_path: &Path,
    output: &Path,
    policy: ConflictPolicy,
    ctx: &Context,
) -> Result<(SyncReport, Option<Phase>)> {
    let workflow: Workflow = manifest::load(workflow_path)
        .with_context(|| format!("Failed to load workflow {}", workflow_path.display()))?;

    let report = sync_steps(&mut testrun.status.steps, &workflow, policy, Some(Utc::now()));
    debug!(
        testrun = testrun.name(),
        updated = report.updated,
        warnings = report.warnings.len(),
        "Synchronized"
    );

    emit(testrun, Some(output), ctx)?;
    Ok((report, workflow.status.phase.and_then(|p| p.observed())))
}

fn print_report(testrun: &Testrun, report: &SyncReport, ctx: &Context) -> Result<()> {
    if ctx.json_output {
        let output = SyncOutput {
            testrun: testrun.name().to_string(),
            updated: report.updated,
            warnings: report.warnings.iter().map(|w| w.to_string()).collect(),
            steps: testrun
                .status
                .iter_steps()
                .map(|s| StepOutput {
                    step: s.key().map(|k| k.to_string()).unwrap_or_default(),
                    phase: s.phase,
                })
                .collect(),
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!();
    println!(
        "{} {}",
        console::style(testrun.name()).bold(),
        dim.apply_to(format!("({} updated)", report.updated))
    );
    for step in testrun.status.iter_steps() {
        let key = step.key().map(|k| k.to_string()).unwrap_or_default();
        println!("  {:<12} {}", phase_style(step.phase).apply_to(step.phase), key);
    }
    for warning in &report.warnings {
        println!("  {} {}", Style::new().yellow().apply_to("⚠"), warning);
    }
    println!();
    Ok(())
}

fn phase_style(phase: Phase) -> Style {
    match phase {
        Phase::Succeeded => Style::new().green(),
        Phase::Failed | Phase::Error => Style::new().red(),
        Phase::Running => Style::new().cyan(),
        Phase::Skipped => Style::new().dim(),
        _ => Style::new(),
    }
}
