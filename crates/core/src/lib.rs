//! Core data model and pure pipeline logic for sequencing-run processing.
//!
//! Everything here is free of process, queue and network management so it
//! can be shared by the controller, the dispatcher and remote workers:
//!
//! - [`types`]: run descriptor, lanes, barcodes and the opaque [`WorkItem`].
//! - [`config`]: the YAML pipeline configuration.
//! - [`manifest`]: local run manifest (`run_info.yaml`) parsing.
//! - [`fanout`]: expansion of lanes into per-barcode work items.
//! - [`aggregate`]: regrouping per-lane results by sample.
//! - [`directories`]: the read-only [`DirectoryContext`].

pub mod aggregate;
pub mod config;
pub mod directories;
pub mod error;
pub mod fanout;
pub mod flowcell;
pub mod index_lookup;
pub mod manifest;
pub mod payload;
pub mod types;

pub use config::PipelineConfig;
pub use directories::{DirRole, DirectoryContext};
pub use error::PipelineError;
pub use types::{BarcodeEntry, FlowcellId, LaneInfo, RunDescriptor, WorkItem};
