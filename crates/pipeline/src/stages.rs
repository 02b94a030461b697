//! The three registered pipeline stages.
//!
//! Each stage delegates its domain work (demultiplexed fastq handling,
//! alignment, per-sample analysis) to the external program configured under
//! `stages.<name>`. The program receives the work item as JSON on stdin and
//! the directory context as `SEQRUN_<ROLE>_DIR` environment variables, and
//! prints its results as JSON on stdout.

use std::time::Duration;

use async_trait::async_trait;
use seqrun_core::payload::{PIPELINE_STAGES, STAGE_PROCESS_ALIGNMENT, STAGE_PROCESS_LANE, STAGE_PROCESS_SAMPLE};
use seqrun_core::{DirRole, DirectoryContext, PipelineConfig, PipelineError, WorkItem};
use seqrun_dispatch::{DispatchError, StageContext, StageError, StageHandler, StageOutcome, StageRegistry};

use crate::command::{resolve_program, Invocation};

pub const STAGE_ENV: &str = "SEQRUN_STAGE";

/// Runs the configured external program for one named stage.
#[derive(Debug, Clone)]
pub struct ProgramStage {
    stage: &'static str,
}

impl ProgramStage {
    pub fn new(stage: &'static str) -> Self {
        Self { stage }
    }
}

#[async_trait]
impl StageHandler for ProgramStage {
    async fn run(&self, item: WorkItem, ctx: &StageContext) -> Result<StageOutcome, StageError> {
        let program = ctx
            .config
            .stage_program(self.stage)
            .map_err(|e| StageError::new(e.to_string()))?;

        let stdin = serde_json::to_vec(&item.0)
            .map_err(|e| StageError::new(format!("cannot encode work item: {e}")))?;
        let done = Invocation::new(&program.program, Duration::from_secs(program.timeout_secs))
            .args(program.args.iter().cloned())
            .envs(stage_env(self.stage, &ctx.dirs))
            .envs(program.env.iter().map(|(k, v)| (k.clone(), v.clone())))
            .current_dir(ctx.dirs.path(DirRole::Work))
            .stdin(stdin)
            .run()
            .await
            .map_err(|e| StageError::new(e.to_string()))?;

        tracing::debug!(
            stage = self.stage,
            elapsed_ms = done.elapsed.as_millis() as u64,
            "Stage program finished",
        );
        parse_results(&done.stdout)
    }
}

/// Environment exposing the stage name and every directory role.
pub fn stage_env(stage: &str, dirs: &DirectoryContext) -> Vec<(String, String)> {
    let mut env = vec![(STAGE_ENV.to_string(), stage.to_string())];
    env.extend(dirs.iter().map(|(role, path)| {
        (
            format!("SEQRUN_{}_DIR", role.as_str().to_ascii_uppercase()),
            path.display().to_string(),
        )
    }));
    env
}

/// Interpret a stage program's stdout.
///
/// Empty output or `null` is the "no result" sentinel. A JSON array is a
/// result list; any other JSON value is a single result.
pub fn parse_results(stdout: &str) -> Result<StageOutcome, StageError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let value: serde_json::Value = serde_json::from_str(trimmed)
        .map_err(|e| StageError::new(format!("stage output is not valid JSON: {e}")))?;
    Ok(match value {
        serde_json::Value::Null => None,
        serde_json::Value::Array(values) => Some(values.into_iter().map(WorkItem).collect()),
        other => Some(vec![WorkItem(other)]),
    })
}

/// Static registry of every pipeline stage.
pub fn registry() -> Result<StageRegistry, DispatchError> {
    StageRegistry::new()
        .with(STAGE_PROCESS_LANE, ProgramStage::new(STAGE_PROCESS_LANE))?
        .with(STAGE_PROCESS_ALIGNMENT, ProgramStage::new(STAGE_PROCESS_ALIGNMENT))?
        .with(STAGE_PROCESS_SAMPLE, ProgramStage::new(STAGE_PROCESS_SAMPLE))
}

/// Ensure every stage has a configured program that can be found.
pub fn check_programs(config: &PipelineConfig) -> Result<(), PipelineError> {
    for stage in PIPELINE_STAGES {
        let program = config.stage_program(stage)?;
        if resolve_program(&program.program).is_none() {
            return Err(PipelineError::Config(format!(
                "stages.{stage}.program not found: {}",
                program.program
            )));
        }
    }
    Ok(())
}
