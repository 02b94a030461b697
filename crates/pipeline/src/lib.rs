//! Pipeline assembly for one sequencing run.
//!
//! The [`controller::PipelineController`] resolves the run, fans lanes out
//! through the dispatcher, aggregates aligned lanes per sample and writes
//! the run summary. Stage work itself is done by external programs
//! ([`stages`]). The [`demultiplex`] module builds barcode count reports.

pub mod command;
pub mod controller;
pub mod demultiplex;
pub mod report;
pub mod stages;
pub mod upload;

pub use controller::{PipelineController, PipelineState, RunOutcome, RunRequest};
pub use report::RunSummary;
pub use upload::{ScriptUploader, SummaryUploader, UploadRequest};
