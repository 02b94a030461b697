//! Demultiplex report: barcode read counts per run and per project.
//!
//! Two reports are produced from the run manifest and the demultiplexer's
//! barcode metrics:
//!
//! - the run report, one row per barcode, written to a worksheet titled
//!   `<date>_<fc>` (or one worksheet per project);
//! - the project report, one spreadsheet `<project>_sequencing_results` per
//!   project holding read counts summed over lanes per sample.

pub mod metrics;
pub mod sheet;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use seqrun_core::{flowcell, manifest, FlowcellId, LaneInfo, PipelineConfig, PipelineError};

pub use metrics::LaneCounts;
pub use sheet::{DirectorySheetSink, HttpSheetSink, SheetSink, SheetTarget, Worksheet};

/// Columns of the run report.
pub const BARCODE_STATS_HEADER: [&str; 11] = [
    "Project name",
    "Lane",
    "Lane description",
    "Sample name",
    "bcbb internal barcode index",
    "Barcode name",
    "Barcode sequence",
    "Barcode type",
    "Demultiplexed read (pair) count",
    "Demultiplexed read (pair) count (millions)",
    "Comment",
];

/// Columns of the project report.
pub const SEQUENCING_RESULT_HEADER: [&str; 7] = [
    "Sample name",
    "Run",
    "Lane",
    "Read (pair) count",
    "Read (pair) count (millions)",
    "Comment",
    "Pass",
];

/// Project label for barcodes without one.
pub const NO_PROJECT: &str = "N/A";

const MANIFEST_FILE_NAME: &str = "run_info.yaml";
const REPORTS_DIR_NAME: &str = "reports";

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("{0}")]
    Config(String),

    #[error("Malformed barcode metrics {path}:{line}: {message}")]
    Metrics {
        path: String,
        line: usize,
        message: String,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Spreadsheet service error ({status}): {body}")]
    Api { status: u16, body: String },
}

impl From<ReportError> for PipelineError {
    fn from(err: ReportError) -> Self {
        match err {
            ReportError::Config(msg) => PipelineError::Config(msg),
            other => PipelineError::Integration(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// Read count of one barcode (or one unmultiplexed lane).
#[derive(Debug, Clone, PartialEq)]
pub struct BarcodeStat {
    pub project: String,
    pub lane: String,
    pub description: String,
    pub sample: String,
    pub barcode_id: String,
    pub barcode_name: String,
    pub barcode_sequence: String,
    pub barcode_type: String,
    pub read_count: Option<u64>,
    pub comment: String,
}

impl BarcodeStat {
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.project.clone(),
            self.lane.clone(),
            self.description.clone(),
            self.sample.clone(),
            self.barcode_id.clone(),
            self.barcode_name.clone(),
            self.barcode_sequence.clone(),
            self.barcode_type.clone(),
            self.read_count.map(|c| c.to_string()).unwrap_or_default(),
            self.read_count.map(millions).unwrap_or_default(),
            self.comment.clone(),
        ]
    }
}

/// Read count in millions, two decimals.
pub fn millions(count: u64) -> String {
    format!("{:.2}", count as f64 / 1_000_000.0)
}

/// Join manifest lanes with their barcode counts.
///
/// Counts for barcode ids absent from the manifest (typically `unmatched`)
/// get their own row.
pub fn barcode_stats(
    lanes: &[LaneInfo],
    counts: &HashMap<String, Option<LaneCounts>>,
) -> Vec<BarcodeStat> {
    let mut stats = Vec::new();

    for lane in lanes {
        let lane_counts = counts.get(&lane.lane).and_then(Option::as_ref);
        let description = lane.description.clone().unwrap_or_default();

        if lane.barcodes.is_empty() {
            stats.push(BarcodeStat {
                project: NO_PROJECT.to_string(),
                lane: lane.lane.clone(),
                description,
                sample: lane.default_sample(),
                barcode_id: String::new(),
                barcode_name: String::new(),
                barcode_sequence: String::new(),
                barcode_type: String::new(),
                read_count: None,
                comment: "Lane is not multiplexed".to_string(),
            });
            continue;
        }

        for barcode in &lane.barcodes {
            let read_count = lane_counts.and_then(|c| c.get(&barcode.barcode_id).copied());
            let comment = match (lane_counts, read_count) {
                (None, _) => "No barcode metrics found for lane".to_string(),
                (Some(_), None) => "No reads demultiplexed for barcode".to_string(),
                (Some(_), Some(_)) => String::new(),
            };
            stats.push(BarcodeStat {
                project: barcode.project.clone().unwrap_or_else(|| NO_PROJECT.to_string()),
                lane: lane.lane.clone(),
                description: description.clone(),
                sample: barcode.name.clone(),
                barcode_id: barcode.barcode_id.clone(),
                barcode_name: barcode.name.clone(),
                barcode_sequence: barcode.sequence.clone(),
                barcode_type: barcode.barcode_type.clone().unwrap_or_default(),
                read_count,
                comment,
            });
        }

        if let Some(lane_counts) = lane_counts {
            let mut extra: Vec<_> = lane_counts
                .iter()
                .filter(|(id, _)| !lane.barcodes.iter().any(|b| &b.barcode_id == *id))
                .collect();
            extra.sort();
            for (id, count) in extra {
                stats.push(BarcodeStat {
                    project: NO_PROJECT.to_string(),
                    lane: lane.lane.clone(),
                    description: description.clone(),
                    sample: String::new(),
                    barcode_id: id.clone(),
                    barcode_name: id.clone(),
                    barcode_sequence: String::new(),
                    barcode_type: String::new(),
                    read_count: Some(*count),
                    comment: "Barcode not in run manifest".to_string(),
                });
            }
        }
    }
    stats
}

fn header(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| c.to_string()).collect()
}

/// Project names in order of first appearance.
pub fn projects(stats: &[BarcodeStat]) -> Vec<String> {
    let mut seen: IndexMap<&str, ()> = IndexMap::new();
    for stat in stats {
        seen.insert(stat.project.as_str(), ());
    }
    seen.into_keys().map(str::to_string).collect()
}

/// Worksheets of the run report.
pub fn run_report(
    flowcell: &FlowcellId,
    stats: &[BarcodeStat],
    worksheet: Option<&str>,
    split_on_project: bool,
) -> Vec<Worksheet> {
    if split_on_project {
        return projects(stats)
            .into_iter()
            .map(|project| Worksheet {
                rows: stats
                    .iter()
                    .filter(|s| s.project == project)
                    .map(BarcodeStat::to_row)
                    .collect(),
                header: header(&BARCODE_STATS_HEADER),
                title: project,
            })
            .collect();
    }
    vec![Worksheet {
        title: worksheet
            .map(str::to_string)
            .unwrap_or_else(|| flowcell.label()),
        header: header(&BARCODE_STATS_HEADER),
        rows: stats.iter().map(BarcodeStat::to_row).collect(),
    }]
}

#[derive(Default)]
struct SampleTotal {
    lanes: Vec<String>,
    read_count: u64,
    comments: Vec<String>,
}

/// Per-sample totals for one project, worksheet titled `<date>_<fc>`.
pub fn project_report(flowcell: &FlowcellId, project: &str, stats: &[BarcodeStat]) -> Worksheet {
    let run = flowcell.label();
    let mut samples: IndexMap<&str, SampleTotal> = IndexMap::new();
    for stat in stats.iter().filter(|s| s.project == project && !s.sample.is_empty()) {
        let total = samples.entry(stat.sample.as_str()).or_default();
        if !total.lanes.contains(&stat.lane) {
            total.lanes.push(stat.lane.clone());
        }
        total.read_count += stat.read_count.unwrap_or(0);
        if !stat.comment.is_empty() {
            total.comments.push(stat.comment.clone());
        }
    }

    Worksheet {
        rows: samples
            .into_iter()
            .map(|(sample, total)| {
                vec![
                    sample.to_string(),
                    run.clone(),
                    total.lanes.join(","),
                    total.read_count.to_string(),
                    millions(total.read_count),
                    total.comments.join("; "),
                    String::new(),
                ]
            })
            .collect(),
        title: run,
        header: header(&SEQUENCING_RESULT_HEADER),
    }
}

/// Spreadsheet title of a project report.
pub fn project_spreadsheet(project: &str) -> String {
    format!("{project}_sequencing_results")
}

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DemultiplexOptions {
    /// Run directory name, e.g. `110106_SN1_0001_FC70BUKAAXX`.
    pub run_name: String,
    pub spreadsheet: String,
    pub credentials: String,
    pub manifest: Option<PathBuf>,
    pub analysis_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub worksheet: Option<String>,
    pub projects_folder: Option<String>,
    pub append: bool,
    pub split_on_project: bool,
}

impl DemultiplexOptions {
    /// `--config`, or `run_info.yaml` in the archive directory.
    pub fn manifest_path(&self) -> PathBuf {
        self.manifest
            .clone()
            .unwrap_or_else(|| self.archive_dir.join(MANIFEST_FILE_NAME))
    }
}

/// What [`upload_report`] wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportSummary {
    pub flowcell: FlowcellId,
    pub barcodes: usize,
    pub run_worksheets: Vec<String>,
    pub project_spreadsheets: Vec<String>,
}

/// Sink selected by the config: HTTP when `upload.endpoint` is set,
/// otherwise TSV files under `<analysis-dir>/reports`.
pub fn sink_for(
    config: &PipelineConfig,
    credentials: &str,
    analysis_dir: &Path,
) -> Result<Box<dyn SheetSink>, ReportError> {
    match config.upload.as_ref().and_then(|u| u.endpoint.as_deref()) {
        Some(endpoint) => Ok(Box::new(HttpSheetSink::new(endpoint, credentials)?)),
        None => Ok(Box::new(DirectorySheetSink::new(analysis_dir.join(REPORTS_DIR_NAME)))),
    }
}

/// Build both reports and write them to `sink`.
///
/// Returns `Ok(None)` without writing anything when the manifest does not
/// exist.
pub async fn upload_report(
    options: &DemultiplexOptions,
    sink: &dyn SheetSink,
) -> Result<Option<ReportSummary>, ReportError> {
    tracing::info!(run = %options.run_name, "Processing run");

    let manifest_path = options.manifest_path();
    if !manifest_path.is_file() {
        tracing::warn!(
            path = %manifest_path.display(),
            "Could not find run manifest, nothing to report",
        );
        return Ok(None);
    }
    let lanes = manifest::load(&manifest_path).map_err(|e| ReportError::Config(e.to_string()))?;
    let flowcell = flowcell::parse_flowcell_dir(Path::new(&options.run_name))
        .map_err(|e| ReportError::Config(e.to_string()))?;

    let counts = metrics::load_lanes(&options.analysis_dir, &flowcell, &lanes)?;
    let stats = barcode_stats(&lanes, &counts);
    let projects = projects(&stats);
    tracing::info!(
        flowcell = %flowcell.label(),
        projects = %projects.join(", "),
        "Writing demultiplex report",
    );

    let run_target = SheetTarget {
        spreadsheet: options.spreadsheet.clone(),
        folder: None,
        append: options.append,
    };
    let mut run_worksheets = Vec::new();
    for sheet in run_report(&flowcell, &stats, options.worksheet.as_deref(), options.split_on_project) {
        sink.write(&run_target, &sheet).await?;
        run_worksheets.push(sheet.title);
    }

    let mut project_spreadsheets = Vec::new();
    for project in projects.iter().filter(|p| p.as_str() != NO_PROJECT) {
        let folder = match options.projects_folder.as_deref().filter(|f| !f.is_empty()) {
            Some(parent) => format!("{parent}/{project}"),
            None => project.clone(),
        };
        let target = SheetTarget {
            spreadsheet: project_spreadsheet(project),
            folder: Some(folder),
            append: false,
        };
        sink.write(&target, &project_report(&flowcell, project, &stats)).await?;
        project_spreadsheets.push(target.spreadsheet);
    }

    Ok(Some(ReportSummary {
        flowcell,
        barcodes: stats.len(),
        run_worksheets,
        project_spreadsheets,
    }))
}

#[cfg(test)]
mod tests {
    use seqrun_core::BarcodeEntry;

    use super::*;

    fn barcode(id: &str, name: &str, project: &str) -> BarcodeEntry {
        BarcodeEntry {
            barcode_id: id.into(),
            barcode_type: Some("SampleSheet".into()),
            name: name.into(),
            sequence: "ATCACG".into(),
            genome_build: None,
            project: Some(project.into()),
        }
    }

    fn lanes() -> Vec<LaneInfo> {
        let lane = |id: &str, barcodes| LaneInfo {
            lane: id.into(),
            name: None,
            description: Some(format!("lane {id}")),
            analysis: None,
            genome_build: "hg19".into(),
            barcodes,
        };
        vec![
            lane("1", vec![barcode("1", "s1", "P1"), barcode("2", "s2", "P2")]),
            lane("2", vec![barcode("1", "s1", "P1")]),
        ]
    }

    fn counts() -> HashMap<String, Option<LaneCounts>> {
        HashMap::from([
            (
                "1".to_string(),
                Some(LaneCounts::from([
                    ("1".to_string(), 1_500_000),
                    ("unmatched".to_string(), 20),
                ])),
            ),
            ("2".to_string(), Some(LaneCounts::from([("1".to_string(), 500_000)]))),
        ])
    }

    // -- barcode rows ------------------------------------------------------

    #[test]
    fn missing_counts_are_commented() {
        let stats = barcode_stats(&lanes(), &counts());
        let s2 = stats.iter().find(|s| s.sample == "s2").unwrap();
        assert_eq!(s2.read_count, None);
        assert_eq!(s2.comment, "No reads demultiplexed for barcode");

        let unmatched = stats.iter().find(|s| s.barcode_id == "unmatched").unwrap();
        assert_eq!(unmatched.project, NO_PROJECT);
        assert_eq!(unmatched.read_count, Some(20));
    }

    #[test]
    fn lane_without_metrics_is_commented() {
        let mut counts = counts();
        counts.insert("2".into(), None);
        let stats = barcode_stats(&lanes(), &counts);
        let lane2 = stats.iter().find(|s| s.lane == "2").unwrap();
        assert_eq!(lane2.comment, "No barcode metrics found for lane");
    }

    #[test]
    fn row_formats_millions() {
        let stats = barcode_stats(&lanes(), &counts());
        let row = stats[0].to_row();
        assert_eq!(row.len(), BARCODE_STATS_HEADER.len());
        assert_eq!(row[8], "1500000");
        assert_eq!(row[9], "1.50");
    }

    // -- worksheets ----------------------------------------------------------

    #[test]
    fn run_report_titles() {
        let fc = FlowcellId::new("FC70BUKAAXX", "110106");
        let stats = barcode_stats(&lanes(), &counts());

        let single = run_report(&fc, &stats, None, false);
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].title, "110106_FC70BUKAAXX");
        assert_eq!(single[0].rows.len(), stats.len());

        assert_eq!(run_report(&fc, &stats, Some("custom"), false)[0].title, "custom");

        let split = run_report(&fc, &stats, Some("ignored"), true);
        let titles: Vec<_> = split.iter().map(|w| w.title.as_str()).collect();
        assert_eq!(titles, ["P1", "P2", NO_PROJECT]);
    }

    #[test]
    fn project_report_sums_lanes_per_sample() {
        let fc = FlowcellId::new("FC70BUKAAXX", "110106");
        let stats = barcode_stats(&lanes(), &counts());
        let sheet = project_report(&fc, "P1", &stats);

        assert_eq!(sheet.title, "110106_FC70BUKAAXX");
        assert_eq!(
            sheet.rows,
            [["s1", "110106_FC70BUKAAXX", "1,2", "2000000", "2.00", "", ""]
                .map(String::from)
                .to_vec()]
        );
    }
}
