//! Testmachinery - compile Testruns into workflows and track their status.
//!
//! Main entry point for the `tm` CLI.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::prelude::*;

mod commands;

use commands::{compile, config, reconcile, sync, validate};

/// Testmachinery - compile Testruns into workflows and track their status
#[derive(Parser)]
#[command(name = "tm")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile a Testrun into an executable workflow
    Compile(compile::CompileArgs),

    /// Check that a Testrun compiles, without rendering the workflow
    Validate(validate::ValidateArgs),

    /// Synchronize step status from a workflow's runtime view
    Sync(sync::SyncArgs),

    /// Run one reconciliation pass over a Testrun
    Reconcile(reconcile::ReconcileArgs),

    /// Settings management
    Config(config::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = testmachinery_config::load_settings(None)?;
    let logging = loaded.settings.logging();

    // Console (human-readable) + rotating JSON file
    let filter = if cli.verbose {
        "tm=debug,testmachinery_flow=debug,testmachinery_config=debug,info"
    } else {
        "tm=info,testmachinery_flow=info,warn"
    };

    let (file_layer, _guard) = if logging.file {
        let log_dir = logging
            .directory
            .clone()
            .or_else(testmachinery_config::default_log_dir)
            .unwrap_or_else(|| std::path::PathBuf::from("logs"));
        let file_appender = tracing_appender::rolling::daily(&log_dir, "testmachinery.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_filter(tracing_subscriber::EnvFilter::new(
                "tm=trace,testmachinery_flow=trace,testmachinery_config=trace,info",
            ));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(file_layer)
        .init();

    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }

    let ctx = commands::Context {
        json_output: cli.json,
        verbose: cli.verbose,
        settings: loaded.settings,
    };

    match cli.command {
        Commands::Compile(args) => compile::run(args, &ctx).await,
        Commands::Validate(args) => validate::run(args, &ctx).await,
        Commands::Sync(args) => sync::run(args, &ctx).await,
        Commands::Reconcile(args) => reconcile::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}
