//! Configuration commands.
//!
//! Shows the effective configuration and writes a starter config file.

use anyhow::{Context, Result};
use clap::Subcommand;
use correlator_core::config::Config;
use std::path::PathBuf;

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration (file, environment and defaults)
    Show,

    /// Write the default configuration as TOML
    Init {
        /// Destination file
        #[arg(default_value = "correlator.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

/// Render a configuration as TOML.
fn to_toml(config: &Config) -> Result<String> {
    toml::to_string_pretty(config).context("Failed to serialize config")
}

pub fn execute(cmd: ConfigCommands, config: &Config, format: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommands::Show => match format {
            OutputFormat::Table => {
                output::print_header("Configuration");
                print!("{}", to_toml(config)?);
            }
            _ => output::print_item(config, format)?,
        },

        ConfigCommands::Init { path, force } => {
            if path.exists() && !force {
                output::print_info(&format!(
                    "{} already exists. Use --force to overwrite.",
                    path.display()
                ));
                return Ok(());
            }

            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(&path, to_toml(&Config::default())?)
                .with_context(|| format!("Failed to write {}", path.display()))?;

            output::print_success(&format!("Wrote {}", path.display()));
        }
    }

    Ok(())
}
