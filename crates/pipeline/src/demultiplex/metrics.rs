//! Barcode read counts written by the demultiplexer.
//!
//! Each lane has `<analysis>/<lane>_<date>_<fc>_barcode/<lane>_<date>_<fc>_bc.metrics`,
//! a tab-separated file of `barcode_id<TAB>read_count` lines.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use seqrun_core::{FlowcellId, LaneInfo};

use super::ReportError;

/// Read counts of one lane, keyed by barcode id.
pub type LaneCounts = HashMap<String, u64>;

/// Path of the metrics file for `lane`.
pub fn metrics_path(analysis_dir: &Path, flowcell: &FlowcellId, lane: &str) -> PathBuf {
    let prefix = flowcell.lane_prefix(lane);
    analysis_dir
        .join(format!("{prefix}_barcode"))
        .join(format!("{prefix}_bc.metrics"))
}

/// Parse the contents of a metrics file.
///
/// Blank lines and `#` comments are skipped. A repeated barcode id keeps
/// the last count.
pub fn parse(path: &Path, text: &str) -> Result<LaneCounts, ReportError> {
    let mut counts = LaneCounts::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split('\t');
        let (Some(id), Some(count)) = (fields.next(), fields.next()) else {
            return Err(ReportError::Metrics {
                path: path.display().to_string(),
                line: idx + 1,
                message: "expected barcode id and read count".into(),
            });
        };
        let count = count.trim().parse::<u64>().map_err(|e| ReportError::Metrics {
            path: path.display().to_string(),
            line: idx + 1,
            message: format!("bad read count '{count}': {e}"),
        })?;
        counts.insert(id.trim().to_string(), count);
    }
    Ok(counts)
}

/// Load counts for every lane. A lane without a metrics file maps to
/// `None`; the report comments on it instead of failing.
pub fn load_lanes(
    analysis_dir: &Path,
    flowcell: &FlowcellId,
    lanes: &[LaneInfo],
) -> Result<HashMap<String, Option<LaneCounts>>, ReportError> {
    let mut out = HashMap::with_capacity(lanes.len());
    for lane in lanes {
        let path = metrics_path(analysis_dir, flowcell, &lane.lane);
        let counts = match std::fs::read_to_string(&path) {
            Ok(text) => Some(parse(&path, &text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(lane = %lane.lane, path = %path.display(), "No barcode metrics for lane");
                None
            }
            Err(e) => return Err(ReportError::Io { path: path.display().to_string(), source: e }),
        };
        out.insert(lane.lane.clone(), counts);
    }
    Ok(out)
}
