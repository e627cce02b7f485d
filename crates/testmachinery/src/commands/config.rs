//! Config command - settings management.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the resolved settings
    Show,

    /// Show which settings files are loaded and their precedence
    Which,

    /// Initialize a settings file with defaults
    Init {
        /// Create project-local settings (./testmachinery.toml) instead of user settings
        #[arg(long)]
        local: bool,
    },

    /// Show the user settings file path
    Path,
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx).await,
        ConfigCommand::Which => cmd_which(ctx).await,
        ConfigCommand::Init { local } => cmd_init(local).await,
        ConfigCommand::Path => cmd_path().await,
    }
}

async fn cmd_show(ctx: &Context) -> Result<()> {
    let settings = &ctx.settings;

    if ctx.json_output {
        let resolved = serde_json::json!({
            "workflow": settings.workflow(),
            "sync": settings.sync(),
            "logging": settings.logging(),
        });
        println!("{}", serde_json::to_string_pretty(&resolved)?);
        return Ok(());
    }

    let workflow = settings.workflow();
    println!("# Testmachinery Settings\n");
    println!("Workflow:");
    println!("  namespace: {}", workflow.namespace);
    println!("  prepare image: {}", workflow.prepare_image);
    println!("  default ttl: {}s", workflow.default_ttl_seconds);
    if !workflow.image_pull_secrets.is_empty() {
        println!("  pull secrets: {}", workflow.image_pull_secrets.join(", "));
    }
    println!();

    let sync = settings.sync();
    println!("Sync:");
    println!("  conflict policy: {}", sync.conflict_policy);
    println!("  poll interval: {}s", sync.poll_interval_secs);
    println!();

    let logging = settings.logging();
    println!("Logging:");
    println!("  file: {}", logging.file);
    let dir = logging.directory.or_else(testmachinery_config::default_log_dir);
    if let Some(dir) = dir {
        println!("  directory: {}", dir.display());
    }
    println!();

    if ctx.verbose {
        println!("---\nRaw settings:\n");
        if let Ok(toml_str) = settings.to_toml() {
            println!("{}", toml_str);
        }
    }

    Ok(())
}

async fn cmd_which(ctx: &Context) -> Result<()> {
    let loaded = testmachinery_config::load_settings(None)?;

    if ctx.json_output {
        let sources: Vec<_> = loaded
            .sources
            .iter()
            .map(|s| serde_json::json!({ "path": s.path, "loaded": s.loaded }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&sources)?);
        return Ok(());
    }

    println!("Settings file search order (later overrides earlier):\n");
    for source in &loaded.sources {
        let status = if source.loaded {
            "✓ loaded"
        } else {
            "· not found"
        };
        println!("  {} {}", status, source.path.display());
    }
    println!();

    if !loaded.warnings.is_empty() {
        println!("Warnings:");
        for w in &loaded.warnings {
            println!("  ⚠ {}", w);
        }
        println!();
    }

    Ok(())
}

async fn cmd_init(local: bool) -> Result<()> {
    let path = if local {
        PathBuf::from("testmachinery.toml")
    } else {
        testmachinery_config::user_config_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
    };

    if path.exists() {
        println!("Settings file already exists: {}", path.display());
        return Ok(());
    }

    let template = r#"# Testmachinery Settings

[workflow]
namespace = "default"
# image_pull_secrets = ["registry-credentials"]
# default_ttl_seconds = 86400
# prepare_image = "europe-docker.pkg.dev/testmachinery/prepare:latest"

[sync]
# most_severe or least_severe
conflict_policy = "most_severe"
poll_interval_secs = 5

# [logging]
# directory = "/var/log/testmachinery"
# file = true
"#;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, template)?;
    println!("✓ Created settings file: {}", path.display());

    Ok(())
}

async fn cmd_path() -> Result<()> {
    if let Some(path) = testmachinery_config::user_config_path() {
        println!("{}", path.display());
    } else {
        eprintln!("Could not determine config directory");
    }
    Ok(())
}
