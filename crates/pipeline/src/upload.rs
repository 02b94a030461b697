//! External summary upload, attempted once after lane processing.
//!
//! Failures here are [`PipelineError::Integration`] and never stop the run;
//! the controller logs them and moves on.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use seqrun_core::config::UploadConfig;
use seqrun_core::{PipelineConfig, PipelineError};

use crate::command::Invocation;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// What the upload hook needs to know about the run.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Basename of the run directory, e.g. `110106_SN1234_0001_FC70BUKAAXX`.
    pub run_name: String,
    pub manifest: Option<PathBuf>,
}

impl UploadRequest {
    pub fn for_run(run_dir: &Path, manifest: Option<&Path>) -> Self {
        let run_name = run_dir
            .components()
            .next_back()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            run_name,
            manifest: manifest.map(Path::to_path_buf),
        }
    }
}

#[async_trait]
pub trait SummaryUploader: Send + Sync {
    async fn upload(&self, request: &UploadRequest) -> Result<(), PipelineError>;
}

/// Runs the configured `upload_script` as
/// `<script> <run-name> <destination> <credentials> --config=<manifest> --analysis_dir=<base-dir>`.
#[derive(Debug, Clone)]
pub struct ScriptUploader {
    upload: Option<UploadConfig>,
    base_dir: Option<String>,
    timeout: Duration,
}

impl ScriptUploader {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            upload: config.upload.clone(),
            base_dir: config.analysis.base_dir.clone(),
            timeout: UPLOAD_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Command line for `request`, or `None` when upload is not configured.
    pub fn command_line(&self, request: &UploadRequest) -> Result<Option<Vec<String>>, PipelineError> {
        let Some(upload) = &self.upload else {
            tracing::info!("No upload section in config, skipping demultiplex upload");
            return Ok(None);
        };
        let Some(base_dir) = &self.base_dir else {
            tracing::warn!("analysis.base_dir not configured, skipping demultiplex upload");
            return Ok(None);
        };
        let script = upload
            .upload_script
            .clone()
            .ok_or_else(|| PipelineError::Integration("upload.upload_script is not set".into()))?;

        let manifest = request
            .manifest
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        Ok(Some(vec![
            script,
            request.run_name.clone(),
            upload.destination_file.clone().unwrap_or_default(),
            upload.credentials.clone().unwrap_or_default(),
            format!("--config={manifest}"),
            format!("--analysis_dir={base_dir}"),
        ]))
    }
}

#[async_trait]
impl SummaryUploader for ScriptUploader {
    async fn upload(&self, request: &UploadRequest) -> Result<(), PipelineError> {
        let Some(argv) = self.command_line(request)? else {
            return Ok(());
        };
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| PipelineError::Integration("empty upload command".into()))?;

        tracing::info!(script = %program, run = %request.run_name, "Uploading demultiplex summary");
        Invocation::new(program.as_str(), self.timeout)
            .args(args.iter().cloned())
            .run()
            .await
            .map_err(|e| PipelineError::Integration(e.to_string()))?;
        Ok(())
    }
}
