//! CLI command handlers

mod run;
mod validate;

use anyhow::Result;
use clap::Subcommand;

pub use run::RunArgs;

/// Top-level commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run a workflow from a pipeline definition
    Run(RunArgs),
    /// Validate a pipeline definition without running anything
    Validate {
        /// Path to the pipeline YAML document
        pipeline: String,
    },
}

/// Route commands to their handlers; returns the process exit code.
pub async fn handle_command(command: Commands, data_dir: &str) -> Result<i32> {
    match command {
        Commands::Run(args) => run::handle_run(args, data_dir).await,
        Commands::Validate { pipeline } => validate::handle_validate(&pipeline),
    }
}

/// Parse a single KEY=value pair
pub(crate) fn parse_key_val(s: &str) -> Result<(String, String)> {
    let pos = s
        .find('=')
        .ok_or_else(|| anyhow::anyhow!("invalid KEY=value: no `=` found in `{}`", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}
