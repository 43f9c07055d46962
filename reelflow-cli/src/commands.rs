//! Command definitions and handlers.

use anyhow::Result;
use clap::{Args, Subcommand};
use reelflow::cancellation::CancellationToken;
use reelflow::checkpoint::CheckpointStore;
use reelflow::config::ReelflowConfig;
use reelflow::pipeline::RunOutcome;
use reelflow::progress::LoggingProgressSink;
use reelflow::utils::{format_iso8601, run_id_for_topic};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{warn, Level};

/// Exit code of a successful run.
pub const EXIT_SUCCEEDED: u8 = 0;
/// Exit code of a failed run.
pub const EXIT_FAILED: u8 = 1;
/// Exit code for configuration problems.
pub const EXIT_CONFIG: u8 = 2;
/// Exit code of a cancelled run (128 + SIGINT).
pub const EXIT_CANCELLED: u8 = 130;

const PIPELINE_NAME: &str = "reelflow";

/// Arguments of `run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Topic to produce content for
    #[arg(long)]
    pub topic: String,

    /// Continue from an existing checkpoint
    #[arg(long)]
    pub resume: bool,

    /// Pipeline configuration file
    #[arg(long, env = "REELFLOW_CONFIG", default_value = "reelflow.toml")]
    pub config: PathBuf,

    /// Run id to use instead of the one derived from the topic
    #[arg(long)]
    pub run_id: Option<String>,
}

/// Top-level CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline for a topic
    Run(RunArgs),
    /// Check stage configuration and credentials without running anything
    Validate {
        /// Pipeline configuration file
        #[arg(long, env = "REELFLOW_CONFIG", default_value = "reelflow.toml")]
        config: PathBuf,
    },
    /// Show the checkpoint of a run, or list runs with checkpoints
    Status {
        /// Topic whose run to show
        #[arg(long)]
        topic: Option<String>,

        /// Run id to show instead of the one derived from the topic
        #[arg(long)]
        run_id: Option<String>,

        /// Pipeline configuration file
        #[arg(long, env = "REELFLOW_CONFIG", default_value = "reelflow.toml")]
        config: PathBuf,
    },
}

/// Handle a CLI command
pub async fn handle_command(command: Commands) -> Result<ExitCode> {
    let code = match command {
        Commands::Run(args) => handle_run(args).await?,
        Commands::Validate { config } => handle_validate(&config),
        Commands::Status { topic, run_id, config } => handle_status(topic, run_id, &config).await?,
    };
    Ok(ExitCode::from(code))
}

/// Maps a run outcome onto the process exit code.
pub fn exit_code_for(outcome: &RunOutcome) -> u8 {
    match outcome {
        RunOutcome::Succeeded { .. } => EXIT_SUCCEEDED,
        RunOutcome::Failed { .. } => EXIT_FAILED,
        RunOutcome::Cancelled { .. } => EXIT_CANCELLED,
    }
}

fn load_config(path: &Path) -> Option<ReelflowConfig> {
    match ReelflowConfig::load(path) {
        Ok(config) => Some(config),
        Err(err) => {
            eprintln!("error: {err}");
            None
        }
    }
}

async fn handle_run(args: RunArgs) -> Result<u8> {
    let Some(config) = load_config(&args.config) else {
        return Ok(EXIT_CONFIG);
    };
    let issues = config.validate();
    if !issues.is_empty() {
        for issue in &issues {
            eprintln!("config: {issue}");
        }
        return Ok(EXIT_CONFIG);
    }

    let pipeline = match config.build_pipeline(PIPELINE_NAME, Arc::new(LoggingProgressSink::new(Level::INFO))) {
        Ok(pipeline) => pipeline,
        Err(err) => {
            eprintln!("error: {err}");
            return Ok(EXIT_CONFIG);
        }
    };

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; cancelling run");
            interrupt.cancel("interrupted by user");
        }
    });

    let outcome = match &args.run_id {
        Some(run_id) => pipeline.run_with_id(run_id, &args.topic, args.resume, &cancel).await,
        None => pipeline.run(&args.topic, args.resume, &cancel).await,
    };

    match &outcome {
        RunOutcome::Succeeded { output, .. } => println!("{}", serde_json::to_string_pretty(output)?),
        RunOutcome::Failed { failure, .. } => eprintln!("error: {failure}"),
        RunOutcome::Cancelled { stage, report } => eprintln!(
            "cancelled during stage '{stage}'; checkpoint for run '{}' kept, rerun with --resume",
            report.run_id
        ),
    }
    Ok(exit_code_for(&outcome))
}

fn handle_validate(config_path: &Path) -> u8 {
    let Some(config) = load_config(config_path) else {
        return EXIT_CONFIG;
    };
    let issues = config.validate();
    if issues.is_empty() {
        println!(
            "ok: {} enabled stage(s), {} dependency table(s)",
            config.enabled_stages().count(),
            config.dependencies.len()
        );
        EXIT_SUCCEEDED
    } else {
        for issue in &issues {
            println!("{issue}");
        }
        EXIT_CONFIG
    }
}

async fn handle_status(topic: Option<String>, run_id: Option<String>, config_path: &Path) -> Result<u8> {
    let Some(config) = load_config(config_path) else {
        return Ok(EXIT_CONFIG);
    };
    let store = config.checkpoint_store();

    let Some(run_id) = run_id.or_else(|| topic.as_deref().map(run_id_for_topic)) else {
        let runs = store.list().await?;
        if runs.is_empty() {
            println!("no checkpoints in {}", store.dir().display());
        }
        for run in runs {
            println!("{run}");
        }
        return Ok(EXIT_SUCCEEDED);
    };

    match store.load(&run_id).await {
        Ok(Some(run)) => {
            println!("run:     {}", run.run_id);
            println!("topic:   {}", run.topic);
            println!("created: {}", format_iso8601(&run.created_at));
            for name in &run.stages {
                match run.checkpoint(name) {
                    Some(cp) => println!(
                        "  [done] {name} (attempt {}, {})",
                        cp.attempt,
                        format_iso8601(&cp.completed_at)
                    ),
                    None => println!("  [    ] {name}"),
                }
            }
            Ok(EXIT_SUCCEEDED)
        }
        Ok(None) => {
            println!("no checkpoint for run '{run_id}'");
            Ok(EXIT_SUCCEEDED)
        }
        Err(err) => {
            eprintln!("error: {err}");
            Ok(EXIT_FAILED)
        }
    }
}
