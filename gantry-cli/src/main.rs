//! Gantry CLI
//!
//! Command-line interface for running and validating declarative build
//! pipelines.

mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "gantry")]
#[command(about = "Declarative build-pipeline orchestrator", long_about = None)]
struct Cli {
    /// Data directory for caches, workspaces, and job workdirs
    #[arg(long, env = "GANTRY_DATA_DIR", default_value = ".gantry")]
    data_dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gantry=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let exit_code = handle_command(cli.command, &cli.data_dir).await?;
    std::process::exit(exit_code);
}
