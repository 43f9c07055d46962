//! Reelflow CLI
//!
//! Runs, validates and inspects checkpointed content pipelines.

mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{handle_command, Commands};
use reelflow::observability::{init_tracing, LogFormat};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "reelflow")]
#[command(about = "Checkpointed, resumable content pipelines", long_about = None)]
struct Cli {
    /// Log output format (plain or json)
    #[arg(long, global = true, env = "REELFLOW_LOG_FORMAT", default_value = "plain")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;
    handle_command(cli.command).await
}
