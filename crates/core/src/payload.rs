//! Stage names and the typed payloads carried inside [`WorkItem`]s.
//!
//! The dispatcher treats payloads as opaque JSON; these types give the
//! registered stages and the controller a shared vocabulary.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::{FlowcellId, WorkItem};

/// Per-lane processing (demultiplexing, fastq preparation).
pub const STAGE_PROCESS_LANE: &str = "process_lane";

/// Per-lane alignment post-processing.
pub const STAGE_PROCESS_ALIGNMENT: &str = "process_alignment";

/// Per-sample processing across all of a sample's lanes.
pub const STAGE_PROCESS_SAMPLE: &str = "process_sample";

/// Every stage the pipeline dispatches, in execution order.
pub const PIPELINE_STAGES: [&str; 3] = [
    STAGE_PROCESS_LANE,
    STAGE_PROCESS_ALIGNMENT,
    STAGE_PROCESS_SAMPLE,
];

/// Input of `process_lane`: one lane, or one barcode within a lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneItem {
    pub flowcell: FlowcellId,
    pub lane: String,
    #[serde(default)]
    pub barcode_id: Option<String>,
    #[serde(default)]
    pub barcode_sequence: Option<String>,
    pub sample: String,
    pub genome_build: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl LaneItem {
    /// File prefix for this item, e.g. `1_110106_FC70BUKAAXX_2`.
    pub fn file_prefix(&self) -> String {
        let prefix = self.flowcell.lane_prefix(&self.lane);
        match &self.barcode_id {
            Some(id) => format!("{prefix}_{id}"),
            None => prefix,
        }
    }
}

/// Output of `process_lane`, input of `process_alignment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneOutput {
    pub item: LaneItem,
    /// Prepared read files for the lane (one or two for paired-end).
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

/// Output of `process_alignment`: one aligned lane of one sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentOutput {
    pub sample: String,
    pub lane: String,
    pub genome_build: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub files: Vec<PathBuf>,
    pub bam: PathBuf,
}

/// Input of `process_sample`: every aligned lane of one sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleItem {
    pub flowcell: FlowcellId,
    pub sample: String,
    pub genome_build: String,
    pub lanes: Vec<AlignmentOutput>,
}

/// Output of `process_sample`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleOutput {
    pub sample: String,
    #[serde(default)]
    pub summary: serde_json::Value,
}

/// Decode every item of a stage result into `T`.
pub fn decode_all<T: serde::de::DeserializeOwned>(
    items: &[WorkItem],
) -> Result<Vec<T>, serde_json::Error> {
    items.iter().map(WorkItem::decode).collect()
}

/// Encode typed payloads as work items.
pub fn encode_all<T: Serialize>(values: &[T]) -> Result<Vec<WorkItem>, serde_json::Error> {
    values.iter().map(WorkItem::encode).collect()
}
