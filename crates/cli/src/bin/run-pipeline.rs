//! Run the automated initial analysis of one sequencing run.
//!
//! ```text
//! run-pipeline <config-file> <run-directory> [<run-manifest-file>]
//! ```
//!
//! Exits 0 once the run reaches `Done`, 1 on any fatal error, 2 on bad usage.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seqrun_core::PipelineConfig;
use seqrun_dispatch::ExecutionMode;
use seqrun_lims::RunResolver;
use seqrun_pipeline::controller::current_work_dir;
use seqrun_pipeline::{stages, PipelineController, RunOutcome, RunRequest, ScriptUploader};

#[derive(Parser, Debug)]
#[command(name = "run-pipeline", about = "Process a sequencing run from lanes to samples")]
struct Cli {
    /// Pipeline configuration (YAML).
    config: PathBuf,

    /// Run directory, named `<date>_<machine>_<run>_<flowcell>`.
    run_dir: PathBuf,

    /// Run manifest (`run_info.yaml`); lanes come from the metadata
    /// service when omitted or missing.
    manifest: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "run_pipeline=info,seqrun_pipeline=info,seqrun_dispatch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(outcome) => {
            tracing::info!(
                summary = %outcome.summary_path.display(),
                samples = outcome.samples.len(),
                "Pipeline finished",
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Pipeline aborted");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<RunOutcome> {
    let config = PipelineConfig::load(&cli.config)?;

    let mode = ExecutionMode::from_config(&config)
        .await
        .context("setting up distributed execution")?;
    if let ExecutionMode::LocalPool(_) = mode {
        // Remote workers resolve their own programs.
        stages::check_programs(&config)?;
    }

    let resolver = RunResolver::from_config(&config)?;
    let uploader = ScriptUploader::from_config(&config);
    let registry = Arc::new(stages::registry()?);

    let request = RunRequest {
        config_file: cli.config,
        run_dir: cli.run_dir,
        manifest: cli.manifest,
        work_dir: current_work_dir()?,
    };
    tracing::info!(
        run_dir = %request.run_dir.display(),
        mode = %mode.label(),
        "Starting pipeline",
    );

    let controller = PipelineController::new(
        Arc::new(config),
        resolver,
        Box::new(uploader),
        registry,
        mode,
    );
    Ok(controller.run(&request).await?)
}
