//! Run metadata: the remote lab information service client and the
//! resolver that turns a flowcell into a [`RunDescriptor`].
//!
//! [`RunDescriptor`]: seqrun_core::RunDescriptor

pub mod client;
pub mod resolver;

pub use client::{LimsClient, LimsError};
pub use resolver::{MetadataSource, RunResolver};
