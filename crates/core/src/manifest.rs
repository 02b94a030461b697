//! Local run manifest (`run_info.yaml`) parsing and lane normalisation.
//!
//! A manifest is a YAML sequence of lanes:
//!
//! ```yaml
//! - lane: 1
//!   description: Human exomes
//!   genome_build: hg19
//!   multiplex:
//!     - barcode_id: 1
//!       name: sample1
//!       sequence: ATCACG
//!       sample_prj: J_Doe_11_01
//! - lane: 2
//!   name: lane2-default
//!   genome_build: mm9
//! ```

use std::collections::HashSet;
use std::path::Path;

use crate::error::PipelineError;
use crate::index_lookup;
use crate::types::LaneInfo;

/// Read and normalise a manifest file.
pub fn load(path: impl AsRef<Path>) -> Result<Vec<LaneInfo>, PipelineError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::Config(format!("cannot read run manifest {}: {e}", path.display()))
    })?;
    parse(&text).map_err(|e| match e {
        PipelineError::Config(msg) => {
            PipelineError::Config(format!("malformed run manifest {}: {msg}", path.display()))
        }
        other => other,
    })
}

/// Parse and normalise manifest text.
pub fn parse(text: &str) -> Result<Vec<LaneInfo>, PipelineError> {
    let lanes: Vec<LaneInfo> = serde_yaml::from_str(text)?;
    normalize(lanes)
}

/// Validate lanes and canonicalise barcode sequences.
///
/// Applied to both manifest and remote-service lane lists so downstream
/// stages see one canonical form:
/// - lane ids are non-empty and unique;
/// - barcode ids are unique within a lane;
/// - index names (`index4`, `rpi12`) are replaced by their sequence, and
///   dual indexes (`ACGT-TGCA`) are kept as two `-`-joined halves;
/// - every lane or barcode resolves to a non-empty reference genome.
pub fn normalize(mut lanes: Vec<LaneInfo>) -> Result<Vec<LaneInfo>, PipelineError> {
    let mut seen_lanes = HashSet::new();

    for lane in &mut lanes {
        lane.lane = lane.lane.trim().to_string();
        if lane.lane.is_empty() {
            return Err(PipelineError::Config("lane entry without a lane id".into()));
        }
        if !seen_lanes.insert(lane.lane.clone()) {
            return Err(PipelineError::Config(format!(
                "lane {} listed more than once",
                lane.lane
            )));
        }

        if lane.barcodes.is_empty() && lane.genome_build.trim().is_empty() {
            return Err(PipelineError::Config(format!(
                "lane {} has no genome_build",
                lane.lane
            )));
        }

        let mut seen_barcodes = HashSet::new();
        for barcode in &mut lane.barcodes {
            if !seen_barcodes.insert(barcode.barcode_id.clone()) {
                return Err(PipelineError::Config(format!(
                    "barcode {} listed more than once in lane {}",
                    barcode.barcode_id, lane.lane
                )));
            }

            if !barcode.sequence.is_empty() {
                barcode.sequence = index_lookup::normalize(&barcode.sequence).ok_or_else(|| {
                    PipelineError::Config(format!(
                        "lane {} barcode {}: '{}' is neither a sequence nor a known index",
                        lane.lane, barcode.barcode_id, barcode.sequence
                    ))
                })?;
            }

            let genome = barcode
                .genome_build
                .as_deref()
                .unwrap_or(&lane.genome_build);
            if genome.trim().is_empty() {
                return Err(PipelineError::Config(format!(
                    "lane {} barcode {} has no genome_build",
                    lane.lane, barcode.barcode_id
                )));
            }
        }
    }

    Ok(lanes)
}
