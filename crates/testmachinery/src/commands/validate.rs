//! Validate command - checks that a Testrun compiles.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use console::Style;
use serde::Serialize;
use testmachinery_flow::{CompileContext, SpecCredentialProvider, compile};

use super::{Context, load_testrun, locations_for};

/// Arguments for the validate command.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Testrun manifest (YAML or JSON)
    pub testrun: PathBuf,

    /// Additional directories of test definitions
    #[arg(short = 'd', long = "definitions")]
    pub definitions: Vec<PathBuf>,
}

/// Validation result for JSON output.
#[derive(Debug, Serialize)]
struct ValidateOutput {
    valid: bool,
    testrun: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    steps: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

/// Run the validate command.
pub async fn run(args: ValidateArgs, ctx: &Context) -> Result<()> {
    let testrun = load_testrun(&args.testrun)?;
    let locations = locations_for(&testrun, &args.testrun, &args.definitions)?;

    let settings = ctx.settings.workflow();
    let provider = SpecCredentialProvider;
    let compile_ctx = CompileContext::new(&locations, &provider).with_settings(&settings);

    let result = compile(&testrun, &compile_ctx);

    if ctx.json_output {
        let output = match &result {
            Ok(compiled) => ValidateOutput {
                valid: true,
                testrun: testrun.name().to_string(),
                steps: Some(compiled.step_count()),
                reason: None,
                message: None,
            },
            Err(e) => ValidateOutput {
                valid: false,
                testrun: testrun.name().to_string(),
                steps: None,
                reason: Some(e.reason()),
                message: Some(e.to_string()),
            },
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        let dim = Style::new().dim();
        match &result {
            Ok(compiled) => {
                println!(
                    "{} {} {}",
                    Style::new().green().apply_to("✓"),
                    testrun.name(),
                    dim.apply_to(format!(
                        "({} main steps, {} exit steps)",
                        compiled.main.step_count(),
                        compiled.exit.step_count()
                    ))
                );
                if ctx.verbose {
                    for step in compiled.main.steps.iter().chain(compiled.exit.steps.iter()) {
                        println!("  {}  {}", step.key, dim.apply_to(&step.name));
                    }
                }
            }
            Err(e) => {
                println!(
                    "{} {} {}",
                    Style::new().red().apply_to("✗"),
                    testrun.name(),
                    dim.apply_to(e.reason())
                );
                println!("  {}", e);
            }
        }
    }

    match result {
        Ok(_) => Ok(()),
        Err(e) => Err(anyhow::anyhow!("Testrun {} is invalid: {}", testrun.name(), e.reason())),
    }
}
