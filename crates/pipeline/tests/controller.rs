//! End-to-end controller runs with in-process stages in place of the
//! external stage programs.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use seqrun_core::config::EmptySamplePolicy;
use seqrun_core::payload::{
    AlignmentOutput, LaneItem, LaneOutput, SampleItem, SampleOutput, STAGE_PROCESS_ALIGNMENT,
    STAGE_PROCESS_LANE, STAGE_PROCESS_SAMPLE,
};
use seqrun_core::{DirRole, PipelineConfig, PipelineError, WorkItem};
use seqrun_dispatch::{
    stage_fn, DistributedRunner, ExecutionMode, InMemoryQueue, MessageQueue, QueueWorker,
    StageError, StageHandler, StageOutcome, StageRegistry,
};
use seqrun_lims::RunResolver;
use seqrun_pipeline::{
    PipelineController, PipelineState, RunRequest, RunSummary, SummaryUploader, UploadRequest,
};

const RUN_NAME: &str = "110106_SN1_0001_FC70BUKAAXX";

const MANIFEST: &str = "\
- lane: 1
  description: Human exomes
  genome_build: hg19
  multiplex:
    - {barcode_id: 1, name: s1, sequence: index1, sample_prj: P1}
    - {barcode_id: 2, name: s2, sequence: CGATGT, sample_prj: P1}
- lane: 2
  genome_build: hg19
  multiplex:
    - {barcode_id: 1, name: s1, sequence: ATCACG, sample_prj: P1}
";

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

struct Fixture {
    _root: tempfile::TempDir,
    request: RunRequest,
}

fn fixture() -> Fixture {
    let root = tempfile::tempdir().unwrap();
    let run_dir = root.path().join(RUN_NAME);
    std::fs::create_dir_all(run_dir.join("fastq")).unwrap();

    let manifest = root.path().join("run_info.yaml");
    std::fs::write(&manifest, MANIFEST).unwrap();
    let config_file = root.path().join("post_process.yaml");
    std::fs::write(&config_file, "algorithm:\n  num_cores: 2\n").unwrap();

    let request = RunRequest {
        config_file,
        run_dir,
        manifest: Some(manifest),
        work_dir: root.path().join("work"),
    };
    Fixture {
        _root: root,
        request,
    }
}

/// Stages that pass payloads through, dropping lane results for samples
/// listed in `drop_samples` at the alignment step.
fn registry(drop_samples: &'static [&'static str]) -> StageRegistry {
    let lane = stage_fn(|item: WorkItem, ctx| async move {
        let lane: LaneItem = item.decode()?;
        let fastq = ctx
            .dirs
            .path(DirRole::Fastq)
            .join(format!("{}_1.fastq", lane.file_prefix()));
        let out = LaneOutput {
            item: lane,
            files: vec![fastq],
        };
        Ok::<StageOutcome, StageError>(Some(vec![WorkItem::encode(&out)?]))
    });

    let alignment = stage_fn(move |item: WorkItem, ctx| async move {
        let lane: LaneOutput = item.decode()?;
        if drop_samples.contains(&lane.item.sample.as_str()) {
            return Ok(None);
        }
        let out = AlignmentOutput {
            bam: ctx
                .dirs
                .path(DirRole::Align)
                .join(format!("{}.bam", lane.item.file_prefix())),
            sample: lane.item.sample,
            lane: lane.item.lane,
            genome_build: lane.item.genome_build,
            project: lane.item.project,
            files: lane.files,
        };
        Ok::<StageOutcome, StageError>(Some(vec![WorkItem::encode(&out)?]))
    });

    let sample = stage_fn(|item: WorkItem, _ctx| async move {
        let sample: SampleItem = item.decode()?;
        let out = SampleOutput {
            summary: serde_json::json!({ "lanes": sample.lanes.len() }),
            sample: sample.sample,
        };
        Ok::<StageOutcome, StageError>(Some(vec![WorkItem::encode(&out)?]))
    });

    StageRegistry::new()
        .with(STAGE_PROCESS_LANE, lane)
        .and_then(|r| r.with(STAGE_PROCESS_ALIGNMENT, alignment))
        .and_then(|r| r.with(STAGE_PROCESS_SAMPLE, sample))
        .unwrap()
}

/// Stage that always returns the "no result" sentinel.
fn nothing() -> impl StageHandler {
    stage_fn(|_item: WorkItem, _ctx| async move { Ok::<StageOutcome, StageError>(None) })
}

#[derive(Default)]
struct RecordingUploader {
    calls: Arc<AtomicUsize>,
    fail: bool,
}

#[async_trait]
impl SummaryUploader for RecordingUploader {
    async fn upload(&self, request: &UploadRequest) -> Result<(), PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(request.run_name, RUN_NAME);
        if self.fail {
            return Err(PipelineError::Integration("spreadsheet service down".into()));
        }
        Ok(())
    }
}

fn controller(
    config: PipelineConfig,
    registry: StageRegistry,
    uploader: RecordingUploader,
    mode: ExecutionMode,
) -> PipelineController {
    PipelineController::new(
        Arc::new(config),
        RunResolver::new(None),
        Box::new(uploader),
        Arc::new(registry),
        mode,
    )
}

fn local() -> ExecutionMode {
    ExecutionMode::LocalPool(NonZeroUsize::new(2).unwrap())
}

fn sample_lanes(summary: &RunSummary, sample: &str) -> Vec<String> {
    let mut lanes = summary
        .samples
        .iter()
        .find(|s| s.sample == sample)
        .map(|s| s.lanes.clone())
        .unwrap_or_default();
    lanes.sort();
    lanes
}

// ---------------------------------------------------------------------------
// Test: a full local run reaches Done
// ---------------------------------------------------------------------------

#[tokio::test]
async fn local_run_visits_every_state_and_writes_summary() {
    let fx = fixture();
    let uploader = RecordingUploader::default();
    let calls = Arc::clone(&uploader.calls);

    let outcome = controller(PipelineConfig::default(), registry(&[]), uploader, local())
        .run(&fx.request)
        .await
        .unwrap();

    assert_eq!(
        outcome.states,
        [
            PipelineState::Resolving,
            PipelineState::LaneDispatch,
            PipelineState::AlignmentDispatch,
            PipelineState::Aggregating,
            PipelineState::SampleDispatch,
            PipelineState::Reporting,
            PipelineState::Done,
        ]
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Index names in the manifest are normalised before fanout.
    let s1 = &outcome.run.lanes[0].barcodes[0];
    assert_eq!(s1.sequence, "ATCACG");

    assert_eq!(sample_lanes(&outcome.summary, "s1"), ["1", "2"]);
    assert_eq!(sample_lanes(&outcome.summary, "s2"), ["1"]);
    assert_eq!(outcome.samples.len(), 2);

    let stages: Vec<_> = outcome
        .summary
        .stages
        .iter()
        .map(|s| (s.stage.as_str(), s.submitted, s.results))
        .collect();
    assert_eq!(
        stages,
        [
            (STAGE_PROCESS_LANE, 3, 3),
            (STAGE_PROCESS_ALIGNMENT, 3, 3),
            (STAGE_PROCESS_SAMPLE, 2, 2),
        ]
    );

    assert!(fx.request.work_dir.join("alignments").is_dir());
    assert_eq!(outcome.summary_path, fx.request.work_dir.join("run_summary.yaml"));
    let written = RunSummary::read(&outcome.summary_path).unwrap();
    assert_eq!(written.flowcell, "FC70BUKAAXX");
    assert_eq!(written.date, "110106");
    assert!(written.upload_error.is_none());
}

// ---------------------------------------------------------------------------
// Test: upload failure is not fatal
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_upload_is_recorded_and_the_run_continues() {
    let fx = fixture();
    let uploader = RecordingUploader {
        fail: true,
        ..Default::default()
    };

    let outcome = controller(PipelineConfig::default(), registry(&[]), uploader, local())
        .run(&fx.request)
        .await
        .unwrap();

    assert_eq!(outcome.states.last(), Some(&PipelineState::Done));
    let written = RunSummary::read(&outcome.summary_path).unwrap();
    assert!(written.upload_error.unwrap().contains("spreadsheet service down"));
}

// ---------------------------------------------------------------------------
// Test: empty samples
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_sample_is_reported_under_warn_policy() {
    let fx = fixture();
    let outcome = controller(
        PipelineConfig::default(),
        registry(&["s2"]),
        RecordingUploader::default(),
        local(),
    )
    .run(&fx.request)
    .await
    .unwrap();

    assert_eq!(outcome.summary.empty_samples, ["s2"]);
    assert_eq!(outcome.samples.len(), 1);
    assert_eq!(outcome.samples[0].sample, "s1");
}

#[tokio::test]
async fn empty_sample_aborts_under_fail_policy() {
    let fx = fixture();
    let mut config = PipelineConfig::default();
    config.algorithm.empty_sample_policy = EmptySamplePolicy::Fail;

    let err = controller(config, registry(&["s2"]), RecordingUploader::default(), local())
        .run(&fx.request)
        .await
        .unwrap_err();

    assert_matches!(err, PipelineError::EmptySampleResult { samples } if samples == ["s2"]);
    assert!(!fx.request.work_dir.join("run_summary.yaml").exists());
}

// ---------------------------------------------------------------------------
// Test: fatal errors stop the run
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stage_failure_aborts_before_upload() {
    let fx = fixture();
    let failing = stage_fn(|_item: WorkItem, _ctx| async move {
        Err::<StageOutcome, StageError>(StageError::new("demultiplexed reads missing"))
    });
    let registry = StageRegistry::new()
        .with(STAGE_PROCESS_LANE, failing)
        .and_then(|r| r.with(STAGE_PROCESS_ALIGNMENT, nothing()))
        .and_then(|r| r.with(STAGE_PROCESS_SAMPLE, nothing()))
        .unwrap();
    let uploader = RecordingUploader::default();
    let calls = Arc::clone(&uploader.calls);

    let err = controller(PipelineConfig::default(), registry, uploader, local())
        .run(&fx.request)
        .await
        .unwrap_err();

    assert_matches!(err, PipelineError::StageExecution { stage, .. } if stage == STAGE_PROCESS_LANE);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_stage_is_a_config_error() {
    let fx = fixture();
    let registry = StageRegistry::new()
        .with(STAGE_PROCESS_LANE, nothing())
        .unwrap();

    let err = controller(PipelineConfig::default(), registry, RecordingUploader::default(), local())
        .run(&fx.request)
        .await
        .unwrap_err();
    assert_matches!(err, PipelineError::Config(msg) if msg.contains(STAGE_PROCESS_ALIGNMENT));
}

#[tokio::test]
async fn run_without_manifest_or_service_is_a_config_error() {
    let fx = fixture();
    let mut request = fx.request.clone();
    request.manifest = None;

    let err = controller(PipelineConfig::default(), registry(&[]), RecordingUploader::default(), local())
        .run(&request)
        .await
        .unwrap_err();
    assert_matches!(err, PipelineError::Config(_));
}

#[tokio::test]
async fn run_dir_without_fastq_is_a_config_error() {
    let fx = fixture();
    std::fs::remove_dir(fx.request.run_dir.join("fastq")).unwrap();

    let err = controller(PipelineConfig::default(), registry(&[]), RecordingUploader::default(), local())
        .run(&fx.request)
        .await
        .unwrap_err();
    assert_matches!(err, PipelineError::Config(_));
}

// ---------------------------------------------------------------------------
// Test: distributed mode produces the same run
// ---------------------------------------------------------------------------

#[tokio::test]
async fn distributed_run_matches_local_run() {
    let fx = fixture();
    let queue = Arc::new(InMemoryQueue::new());
    let registry = Arc::new(registry(&[]));
    let cancel = CancellationToken::new();

    let workers: Vec<_> = (0..2)
        .map(|_| {
            let worker = QueueWorker::new(
                Arc::clone(&queue) as Arc<dyn MessageQueue>,
                Arc::clone(&registry),
                Arc::new(PipelineConfig::default()),
                "pipeline-itest",
            )
            .with_poll_interval(Duration::from_millis(10));
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.serve(cancel).await })
        })
        .collect();

    let mode = ExecutionMode::Distributed(
        DistributedRunner::new(Arc::clone(&queue) as Arc<dyn MessageQueue>, "pipeline-itest")
            .with_poll_interval(Duration::from_millis(10))
            .with_reply_timeout(Some(Duration::from_secs(10))),
    );
    let outcome = PipelineController::new(
        Arc::new(PipelineConfig::default()),
        RunResolver::new(None),
        Box::new(RecordingUploader::default()),
        Arc::clone(&registry),
        mode,
    )
    .run(&fx.request)
    .await
    .unwrap();

    cancel.cancel();
    let mut handled = 0;
    for worker in workers {
        handled += worker.await.unwrap();
    }

    // 3 lane items, 3 alignments, 2 samples.
    assert_eq!(handled, 8);
    assert_eq!(outcome.summary.execution_mode, "distributed");
    assert_eq!(sample_lanes(&outcome.summary, "s1"), ["1", "2"]);
    assert!(queue.queue_names().is_empty());
}
