//! Run directory naming conventions.

use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::types::FlowcellId;

/// Suffixes that identify the flowcell barcode component of a run name.
const FLOWCELL_SUFFIXES: [&str; 4] = ["XX", "xx", "XY", "X2"];

/// Parse the flowcell name and date from a run directory or run name,
/// e.g. `110106_SN1234_0042_FC70BUKAAXX`.
pub fn parse_flowcell_dir(path: impl AsRef<Path>) -> Result<FlowcellId, PipelineError> {
    let path = path.as_ref();
    let base = path
        .components()
        .next_back()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut name = None;
    let mut date = None;
    for part in base.split('_') {
        if FLOWCELL_SUFFIXES.iter().any(|s| part.ends_with(s)) {
            name = Some(part);
        } else if part.len() == 6 && part.bytes().all(|b| b.is_ascii_digit()) {
            date = Some(part);
        }
    }

    match (name, date) {
        (Some(name), Some(date)) => Ok(FlowcellId::new(name, date)),
        _ => Err(PipelineError::Config(format!(
            "did not find flowcell name and date in '{}'",
            path.display()
        ))),
    }
}

/// Locate the directory holding the run's fastq files.
///
/// Prefers the pipeline-analysis layout `Data/*firecrest*/Bustard*/fastq`
/// and falls back to `<run>/fastq`.
pub fn find_fastq_dir(run_dir: impl AsRef<Path>) -> Result<PathBuf, PipelineError> {
    let run_dir = run_dir.as_ref();

    for firecrest in matching_subdirs(&run_dir.join("Data"), |n| n.contains("firecrest")) {
        for bustard in matching_subdirs(&firecrest, |n| n.starts_with("Bustard")) {
            let fastq = bustard.join("fastq");
            if fastq.is_dir() {
                return Ok(fastq);
            }
        }
    }

    let fastq = run_dir.join("fastq");
    if fastq.is_dir() {
        return Ok(fastq);
    }

    Err(PipelineError::Config(format!(
        "no fastq directory found under {}",
        run_dir.display()
    )))
}

/// Sorted subdirectories of `dir` whose name satisfies `keep`.
fn matching_subdirs(dir: &Path, keep: impl Fn(&str) -> bool) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|e| e.path().is_dir())
        .filter(|e| keep(&e.file_name().to_string_lossy()))
        .map(|e| e.path())
        .collect();
    dirs.sort();
    dirs
}
