//! `run_summary.yaml`: what the run did, written in the Reporting state.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use seqrun_core::aggregate::SampleGroup;
use seqrun_core::payload::AlignmentOutput;
use seqrun_core::{PipelineError, RunDescriptor};

pub const SUMMARY_FILE_NAME: &str = "run_summary.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageCount {
    pub stage: String,
    pub submitted: usize,
    pub results: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleSummary {
    pub sample: String,
    pub genome_build: String,
    pub lanes: Vec<String>,
}

impl From<&SampleGroup<AlignmentOutput>> for SampleSummary {
    fn from(group: &SampleGroup<AlignmentOutput>) -> Self {
        Self {
            sample: group.sample.clone(),
            genome_build: group
                .lanes
                .first()
                .map(|l| l.genome_build.clone())
                .unwrap_or_default(),
            lanes: group.lanes.iter().map(|l| l.lane.clone()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub flowcell: String,
    pub date: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub execution_mode: String,
    pub lanes: usize,
    pub stages: Vec<StageCount>,
    pub samples: Vec<SampleSummary>,
    /// Samples that received no lane results.
    #[serde(default)]
    pub empty_samples: Vec<String>,
    /// Set when the upload hook failed; the run still completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_error: Option<String>,
}

impl RunSummary {
    pub fn new(run: &RunDescriptor, execution_mode: impl Into<String>) -> Self {
        Self {
            flowcell: run.flowcell.name.clone(),
            date: run.flowcell.date.clone(),
            run_id: run.run_id.clone(),
            generated_at: Utc::now(),
            execution_mode: execution_mode.into(),
            lanes: run.lanes.len(),
            stages: Vec::new(),
            samples: Vec::new(),
            empty_samples: Vec::new(),
            upload_error: None,
        }
    }

    pub fn record_stage(&mut self, stage: &str, submitted: usize, results: usize) {
        self.stages.push(StageCount {
            stage: stage.to_string(),
            submitted,
            results,
        });
    }

    /// Write the summary into `dir` and return the file path.
    pub fn write(&self, dir: &Path) -> Result<PathBuf, PipelineError> {
        let path = dir.join(SUMMARY_FILE_NAME);
        let text = serde_yaml::to_string(self)
            .map_err(|e| PipelineError::Config(format!("cannot encode run summary: {e}")))?;
        std::fs::write(&path, text).map_err(|e| PipelineError::io(&path, e))?;
        tracing::info!(path = %path.display(), "Wrote run summary");
        Ok(path)
    }

    pub fn read(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        Ok(serde_yaml::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use seqrun_core::FlowcellId;

    use super::*;

    #[test]
    fn summary_round_trips_through_the_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let run = RunDescriptor {
            flowcell: FlowcellId::new("FC70BUKAAXX", "110106"),
            run_id: String::new(),
            lanes: vec![],
        };
        let mut summary = RunSummary::new(&run, "local(2)");
        summary.record_stage("process_lane", 3, 3);
        summary.empty_samples.push("sample9".into());

        let path = summary.write(dir.path()).unwrap();
        assert!(path.ends_with(SUMMARY_FILE_NAME));

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("run_id"));
        assert!(!text.contains("upload_error"));
        assert_eq!(RunSummary::read(&path).unwrap(), summary);
    }
}
