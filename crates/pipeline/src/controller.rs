//! Pipeline Controller: drives one run through its fixed sequence of states.
//!
//! ```text
//! Resolving → LaneDispatch → AlignmentDispatch → Aggregating
//!           → SampleDispatch → Reporting → Done
//! ```
//!
//! Every transition waits for the previous stage's dispatcher call to return
//! in full. Only the upload hook after lane dispatch may fail without ending
//! the run.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use seqrun_core::aggregate::{aggregate_expected, SampleGroup};
use seqrun_core::payload::{
    self, AlignmentOutput, SampleItem, SampleOutput, PIPELINE_STAGES, STAGE_PROCESS_ALIGNMENT,
    STAGE_PROCESS_LANE, STAGE_PROCESS_SAMPLE,
};
use seqrun_core::{fanout, flowcell, DirRole, DirectoryContext, PipelineConfig, PipelineError, RunDescriptor, WorkItem};
use seqrun_dispatch::{Dispatcher, ExecutionMode, StageContext, StageRegistry};
use seqrun_lims::RunResolver;

use crate::report::{RunSummary, SampleSummary};
use crate::upload::{SummaryUploader, UploadRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Resolving,
    LaneDispatch,
    AlignmentDispatch,
    Aggregating,
    SampleDispatch,
    Reporting,
    Done,
}

impl PipelineState {
    /// The only state reachable from `self`.
    pub fn next(self) -> Option<Self> {
        use PipelineState::*;
        match self {
            Resolving => Some(LaneDispatch),
            LaneDispatch => Some(AlignmentDispatch),
            AlignmentDispatch => Some(Aggregating),
            Aggregating => Some(SampleDispatch),
            SampleDispatch => Some(Reporting),
            Reporting => Some(Done),
            Done => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolving => "resolving",
            Self::LaneDispatch => "lane_dispatch",
            Self::AlignmentDispatch => "alignment_dispatch",
            Self::Aggregating => "aggregating",
            Self::SampleDispatch => "sample_dispatch",
            Self::Reporting => "reporting",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Paths identifying one run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub config_file: PathBuf,
    pub run_dir: PathBuf,
    pub manifest: Option<PathBuf>,
    /// Working root; alignments go to `<work_dir>/alignments`.
    pub work_dir: PathBuf,
}

/// Result of a completed run.
#[derive(Debug)]
pub struct RunOutcome {
    pub run: RunDescriptor,
    pub summary: RunSummary,
    pub summary_path: PathBuf,
    pub samples: Vec<SampleOutput>,
    /// Every state visited, in order.
    pub states: Vec<PipelineState>,
}

pub struct PipelineController {
    config: Arc<PipelineConfig>,
    resolver: RunResolver,
    uploader: Box<dyn SummaryUploader>,
    registry: Arc<StageRegistry>,
    mode: ExecutionMode,
    state: PipelineState,
    states: Vec<PipelineState>,
}

impl PipelineController {
    pub fn new(
        config: Arc<PipelineConfig>,
        resolver: RunResolver,
        uploader: Box<dyn SummaryUploader>,
        registry: Arc<StageRegistry>,
        mode: ExecutionMode,
    ) -> Self {
        Self {
            config,
            resolver,
            uploader,
            registry,
            mode,
            state: PipelineState::Resolving,
            states: vec![PipelineState::Resolving],
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Run every state to `Done`, or stop at the first fatal error.
    pub async fn run(mut self, request: &RunRequest) -> Result<RunOutcome, PipelineError> {
        let result = self.drive(request).await;
        if let Err(e) = &result {
            tracing::error!(state = %self.state, error = %e, "Pipeline failed");
        }
        result
    }

    async fn drive(&mut self, request: &RunRequest) -> Result<RunOutcome, PipelineError> {
        // -- Resolving ------------------------------------------------------
        self.ensure_registered()?;
        let flowcell = flowcell::parse_flowcell_dir(&request.run_dir)?;
        tracing::info!(flowcell = %flowcell.name, date = %flowcell.date, "Starting run");

        let run = self
            .resolver
            .resolve(&flowcell, request.manifest.as_deref())
            .await?;
        let dirs = DirectoryContext::for_run(&request.run_dir, &request.config_file, &request.work_dir)?;
        dirs.prepare()?;

        let ctx = StageContext::new(Arc::new(dirs), Arc::clone(&self.config));
        let dispatcher = Dispatcher::new(Arc::clone(&self.registry), self.mode.clone(), ctx);
        let mut summary = RunSummary::new(&run, self.mode.label());

        // -- LaneDispatch -----------------------------------------------------
        self.advance();
        let lane_items = fanout::expand(&run.flowcell, &run.lanes);
        let expected_samples: Vec<String> = lane_items.iter().map(|i| i.sample.clone()).collect();
        let lane_outputs = dispatch(
            &dispatcher,
            &mut summary,
            STAGE_PROCESS_LANE,
            encode(STAGE_PROCESS_LANE, &lane_items)?,
        )
        .await?;

        let upload = UploadRequest::for_run(&request.run_dir, request.manifest.as_deref());
        if let Err(e) = self.uploader.upload(&upload).await {
            tracing::warn!(error = %e, "Summary upload failed, resuming pipeline");
            summary.upload_error = Some(e.to_string());
        }

        // -- AlignmentDispatch ------------------------------------------------
        self.advance();
        let aligned = dispatch(&dispatcher, &mut summary, STAGE_PROCESS_ALIGNMENT, lane_outputs).await?;
        let alignments: Vec<AlignmentOutput> = decode(STAGE_PROCESS_ALIGNMENT, &aligned)?;

        // -- Aggregating ------------------------------------------------------
        self.advance();
        let aggregation = aggregate_expected(
            expected_samples,
            alignments.into_iter().map(|a| (a.sample.clone(), a)),
        );
        aggregation.enforce(self.config.algorithm.empty_sample_policy)?;
        summary.samples = aggregation.groups.iter().map(SampleSummary::from).collect();
        summary.empty_samples = aggregation.empty.clone();

        // -- SampleDispatch ---------------------------------------------------
        self.advance();
        let sample_items = sample_items(&run, aggregation.groups);
        let processed = dispatch(
            &dispatcher,
            &mut summary,
            STAGE_PROCESS_SAMPLE,
            encode(STAGE_PROCESS_SAMPLE, &sample_items)?,
        )
        .await?;
        let samples: Vec<SampleOutput> = decode(STAGE_PROCESS_SAMPLE, &processed)?;

        // -- Reporting --------------------------------------------------------
        self.advance();
        let summary_path = summary.write(dispatcher.context().dirs.path(DirRole::Work))?;

        self.advance();
        tracing::info!(
            flowcell = %run.flowcell.name,
            samples = samples.len(),
            "Run complete",
        );
        Ok(RunOutcome {
            run,
            summary,
            summary_path,
            samples,
            states: self.states.clone(),
        })
    }

    fn advance(&mut self) {
        let Some(next) = self.state.next() else {
            return;
        };
        tracing::info!(from = %self.state, to = %next, "Pipeline state transition");
        self.state = next;
        self.states.push(next);
    }

    fn ensure_registered(&self) -> Result<(), PipelineError> {
        for stage in PIPELINE_STAGES {
            if !self.registry.contains(stage) {
                return Err(PipelineError::Config(format!("stage {stage} is not registered")));
            }
        }
        Ok(())
    }
}

async fn dispatch(
    dispatcher: &Dispatcher,
    summary: &mut RunSummary,
    stage: &str,
    items: Vec<WorkItem>,
) -> Result<Vec<WorkItem>, PipelineError> {
    let submitted = items.len();
    let results = dispatcher.run(stage, items).await?;
    summary.record_stage(stage, submitted, results.len());
    Ok(results)
}

fn encode<T: serde::Serialize>(stage: &str, values: &[T]) -> Result<Vec<WorkItem>, PipelineError> {
    payload::encode_all(values).map_err(|e| PipelineError::StageExecution {
        stage: stage.to_string(),
        message: format!("cannot encode stage input: {e}"),
    })
}

fn decode<T: serde::de::DeserializeOwned>(stage: &str, items: &[WorkItem]) -> Result<Vec<T>, PipelineError> {
    payload::decode_all(items).map_err(|e| PipelineError::StageExecution {
        stage: stage.to_string(),
        message: format!("unexpected stage output: {e}"),
    })
}

fn sample_items(run: &RunDescriptor, groups: Vec<SampleGroup<AlignmentOutput>>) -> Vec<SampleItem> {
    groups
        .into_iter()
        .map(|group| SampleItem {
            flowcell: run.flowcell.clone(),
            genome_build: group
                .lanes
                .first()
                .map(|l| l.genome_build.clone())
                .unwrap_or_default(),
            sample: group.sample,
            lanes: group.lanes,
        })
        .collect()
}

/// Default work directory: the invocation's current directory.
pub fn current_work_dir() -> Result<PathBuf, PipelineError> {
    std::env::current_dir().map_err(|e| PipelineError::io(Path::new("."), e))
}
