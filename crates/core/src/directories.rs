//! Fixed mapping from logical directory role to absolute path.
//!
//! Built once by [`DirectoryContext::for_run`], prepared before the first
//! dispatch and then shared read-only (by reference locally, by value in
//! task envelopes for remote workers).

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::flowcell;

/// Name of the alignment output directory under the working root.
pub const ALIGN_DIR_NAME: &str = "alignments";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirRole {
    /// Demultiplexed fastq input inside the run directory.
    Fastq,
    /// The run (flowcell) directory itself.
    Flowcell,
    /// Directory holding the configuration file.
    Config,
    /// Working root, the invocation's current directory.
    Work,
    /// Alignment output under the working root.
    Align,
}

impl DirRole {
    pub const ALL: [DirRole; 5] = [
        DirRole::Fastq,
        DirRole::Flowcell,
        DirRole::Config,
        DirRole::Work,
        DirRole::Align,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fastq => "fastq",
            Self::Flowcell => "flowcell",
            Self::Config => "config",
            Self::Work => "work",
            Self::Align => "align",
        }
    }

    /// Whether the directory is created by the pipeline rather than
    /// required to exist beforehand.
    pub fn is_output(&self) -> bool {
        matches!(self, Self::Work | Self::Align)
    }
}

impl fmt::Display for DirRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryContext {
    paths: BTreeMap<DirRole, PathBuf>,
}

impl DirectoryContext {
    /// Derive the directory layout for a run.
    ///
    /// `run_dir` must expose a discoverable fastq directory; the work and
    /// alignment directories are placed under `work_dir`.
    pub fn for_run(
        run_dir: &Path,
        config_file: &Path,
        work_dir: &Path,
    ) -> Result<Self, PipelineError> {
        let run_dir = absolute(run_dir)?;
        let work_dir = absolute(work_dir)?;
        let config_dir = absolute(config_file)?
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| work_dir.clone());
        let fastq_dir = flowcell::find_fastq_dir(&run_dir)?;

        Ok(Self::from_paths([
            (DirRole::Fastq, fastq_dir),
            (DirRole::Flowcell, run_dir),
            (DirRole::Config, config_dir),
            (DirRole::Align, work_dir.join(ALIGN_DIR_NAME)),
            (DirRole::Work, work_dir),
        ]))
    }

    /// Build a context from explicit paths; roles not given default to the
    /// work directory (or `.` when that is missing too).
    pub fn from_paths(paths: impl IntoIterator<Item = (DirRole, PathBuf)>) -> Self {
        let mut paths: BTreeMap<DirRole, PathBuf> = paths.into_iter().collect();
        let fallback = paths
            .get(&DirRole::Work)
            .cloned()
            .unwrap_or_else(|| PathBuf::from("."));
        for role in DirRole::ALL {
            paths.entry(role).or_insert_with(|| fallback.clone());
        }
        Self { paths }
    }

    pub fn path(&self, role: DirRole) -> &Path {
        // Every role is populated by the constructors.
        self.paths
            .get(&role)
            .map(PathBuf::as_path)
            .unwrap_or_else(|| Path::new("."))
    }

    pub fn iter(&self) -> impl Iterator<Item = (DirRole, &Path)> {
        self.paths.iter().map(|(role, path)| (*role, path.as_path()))
    }

    /// Ensure input directories exist and create output directories.
    ///
    /// Must succeed before any dispatcher stage runs.
    pub fn prepare(&self) -> Result<(), PipelineError> {
        for (role, path) in self.iter() {
            if role.is_output() {
                std::fs::create_dir_all(path).map_err(|e| PipelineError::io(path, e))?;
            } else if !path.is_dir() {
                return Err(PipelineError::Config(format!(
                    "{role} directory does not exist: {}",
                    path.display()
                )));
            }
        }
        tracing::debug!(work = %self.path(DirRole::Work).display(), "Directory context prepared");
        Ok(())
    }
}

fn absolute(path: &Path) -> Result<PathBuf, PipelineError> {
    std::path::absolute(path).map_err(|e| PipelineError::io(path, e))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn run_layout() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let root = tempfile::tempdir().expect("tempdir");
        let run = root.path().join("110106_FC70BUKAAXX");
        std::fs::create_dir_all(run.join("fastq")).expect("mkdir fastq");
        let config = root.path().join("conf/post_process.yaml");
        std::fs::create_dir_all(config.parent().expect("parent")).expect("mkdir conf");
        std::fs::write(&config, "algorithm: {num_cores: 1}\n").expect("write config");
        (root, run, config)
    }

    #[test]
    fn for_run_derives_every_role() {
        let (root, run, config) = run_layout();
        let work = root.path().join("work");
        let dirs = DirectoryContext::for_run(&run, &config, &work).expect("layout");

        assert_eq!(dirs.path(DirRole::Fastq), run.join("fastq"));
        assert_eq!(dirs.path(DirRole::Flowcell), run);
        assert_eq!(dirs.path(DirRole::Config), root.path().join("conf"));
        assert_eq!(dirs.path(DirRole::Work), work);
        assert_eq!(dirs.path(DirRole::Align), work.join(ALIGN_DIR_NAME));
    }

    #[test]
    fn prepare_creates_output_directories() {
        let (root, run, config) = run_layout();
        let work = root.path().join("work");
        let dirs = DirectoryContext::for_run(&run, &config, &work).expect("layout");

        dirs.prepare().expect("prepare");
        assert!(work.join(ALIGN_DIR_NAME).is_dir());
    }

    #[test]
    fn prepare_rejects_missing_input_directory() {
        let root = tempfile::tempdir().expect("tempdir");
        let dirs = DirectoryContext::from_paths([
            (DirRole::Work, root.path().to_path_buf()),
            (DirRole::Fastq, root.path().join("missing")),
        ]);
        assert_matches!(dirs.prepare(), Err(PipelineError::Config(_)));
    }

    #[test]
    fn round_trips_through_json_for_remote_workers() {
        let dirs = DirectoryContext::from_paths([(DirRole::Work, PathBuf::from("/w"))]);
        let json = serde_json::to_value(&dirs).expect("serialize");
        assert_eq!(json["paths"]["align"], "/w");
        let back: DirectoryContext = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, dirs);
    }
}
