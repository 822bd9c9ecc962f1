//! Correlator CLI - run correlation pipelines over JSON-lines event files.
//!
//! Provides aggregate, resequence, dedup, and configuration commands.

mod commands;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::{aggregate, config, dedup, resequence};
use output::OutputFormat;

/// Correlator - correlation-based event grouping
#[derive(Parser)]
#[command(
    name = "correlator",
    author = "Aezi <aezi.zhu@icloud.com>",
    version = "0.1.0",
    about = "Correlator - event grouping, aggregation and resequencing",
    long_about = "Groups JSON-lines events by correlation id, then merges or reorders each completed group.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true, env = "CORRELATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Log level, overriding telemetry.logging.level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge each completed group into one event
    Aggregate(aggregate::AggregateArgs),

    /// Release each completed group in sequence order
    Resequence(resequence::ResequenceArgs),

    /// Run only the idempotent filter
    Dedup(dedup::DedupArgs),

    /// Configuration management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut settings = commands::load_config(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        settings.telemetry.logging.level = level;
    }
    correlator_core::telemetry::init_logging(&settings.telemetry.logging)
        .context("Failed to initialize logging")?;
    tracing::debug!(command = ?std::env::args().nth(1), "Configuration loaded");

    let format = cli.output;
    match cli.command {
        Commands::Aggregate(args) => aggregate::execute(args, &settings, format),
        Commands::Resequence(args) => resequence::execute(args, &settings, format),
        Commands::Dedup(args) => dedup::execute(args, &settings, format),
        Commands::Config(cmd) => config::execute(cmd, &settings, format),
    }
}
