//! Upload per-barcode read counts of a demultiplexed run.
//!
//! Writes the run report to a worksheet of `<spreadsheet-id>` and one
//! `<project>_sequencing_results` spreadsheet per project. A missing run
//! manifest is reported and the command exits successfully.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seqrun_core::PipelineConfig;
use seqrun_pipeline::demultiplex::{self, DemultiplexOptions};

#[derive(Parser, Debug)]
#[command(
    name = "upload-demultiplex-report",
    about = "Upload barcode read counts after demultiplexing"
)]
struct Cli {
    /// Run directory name, e.g. `110106_SN1_0001_FC70BUKAAXX`.
    run_name: String,

    /// Spreadsheet receiving the run report.
    spreadsheet_id: String,

    /// Credentials for the spreadsheet service.
    credentials: String,

    /// Run manifest; defaults to `<archive-dir>/run_info.yaml`.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Directory holding the `*_barcode` metrics directories.
    #[arg(short = 'd', long = "analysis-dir", alias = "analysis_dir")]
    analysis_dir: Option<PathBuf>,

    #[arg(short = 'r', long = "archive-dir", alias = "archive_dir")]
    archive_dir: Option<PathBuf>,

    /// Worksheet title; defaults to `<date>_<flowcell>`.
    #[arg(short = 'w', long = "worksheet", alias = "gdocs_worksheet")]
    worksheet: Option<String>,

    /// Parent folder for the per-project spreadsheets.
    #[arg(short = 'p', long = "projects-folder", alias = "gdocs_projects_folder")]
    projects_folder: Option<String>,

    #[arg(short = 'a', long = "append", action = ArgAction::SetTrue)]
    append: bool,

    #[arg(short = 's', long = "split-on-project", alias = "split_on_project", action = ArgAction::SetTrue)]
    split_on_project: bool,

    /// Pipeline configuration; its `upload.endpoint` selects the HTTP sink.
    #[arg(long = "pipeline-config")]
    pipeline_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "upload_demultiplex_report=info,seqrun_pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Demultiplex report failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let cwd = std::env::current_dir()?;
    let config = match &cli.pipeline_config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    let options = DemultiplexOptions {
        run_name: cli.run_name,
        spreadsheet: cli.spreadsheet_id,
        credentials: cli.credentials,
        manifest: cli.config,
        analysis_dir: cli.analysis_dir.unwrap_or_else(|| cwd.clone()),
        archive_dir: cli.archive_dir.unwrap_or(cwd),
        worksheet: cli.worksheet,
        projects_folder: cli.projects_folder.or_else(|| {
            config
                .upload
                .as_ref()
                .and_then(|u| u.projects_folder.clone())
        }),
        append: cli.append,
        split_on_project: cli.split_on_project,
    };
    if options.manifest.is_none() {
        tracing::info!(
            path = %options.manifest_path().display(),
            "No manifest supplied, using the archive directory",
        );
    }

    let sink = demultiplex::sink_for(&config, &options.credentials, &options.analysis_dir)?;
    if let Some(summary) = demultiplex::upload_report(&options, sink.as_ref()).await? {
        tracing::info!(
            flowcell = %summary.flowcell.label(),
            barcodes = summary.barcodes,
            worksheets = summary.run_worksheets.len(),
            projects = summary.project_spreadsheets.len(),
            "Demultiplex report written",
        );
    }
    Ok(())
}
