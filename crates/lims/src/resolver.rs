//! RunDescriptor resolution: local manifest first, remote service otherwise.

use std::path::Path;

use async_trait::async_trait;

use seqrun_core::{manifest, FlowcellId, LaneInfo, PipelineConfig, PipelineError, RunDescriptor};

use crate::client::LimsClient;

/// Anything that can describe a run's lanes by flowcell identity.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Returns `(run_id, lanes)` for the flowcell.
    async fn lanes(&self, flowcell: &FlowcellId) -> Result<(String, Vec<LaneInfo>), PipelineError>;
}

#[async_trait]
impl MetadataSource for LimsClient {
    async fn lanes(&self, flowcell: &FlowcellId) -> Result<(String, Vec<LaneInfo>), PipelineError> {
        let details = self.run_details(flowcell).await?;
        Ok((details.run_id(), details.details))
    }
}

/// Produces the immutable [`RunDescriptor`] for a run.
pub struct RunResolver {
    source: Option<Box<dyn MetadataSource>>,
}

impl RunResolver {
    pub fn new(source: Option<Box<dyn MetadataSource>>) -> Self {
        Self { source }
    }

    /// Resolver backed by the service named in `galaxy_url`/`galaxy_api_key`,
    /// or manifest-only when those keys are absent.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let source = match config.metadata_service() {
            Some((url, key)) => {
                let client = LimsClient::new(url, key)?;
                Some(Box::new(client) as Box<dyn MetadataSource>)
            }
            None => None,
        };
        Ok(Self::new(source))
    }

    /// Resolve the lanes of `flowcell`.
    ///
    /// An existing manifest takes precedence and the service is never
    /// contacted. A manifest path that does not exist falls back to the
    /// service. Both paths yield normalised lanes.
    pub async fn resolve(
        &self,
        flowcell: &FlowcellId,
        manifest_path: Option<&Path>,
    ) -> Result<RunDescriptor, PipelineError> {
        if let Some(path) = manifest_path {
            if path.is_file() {
                let lanes = manifest::load(path)?;
                tracing::info!(
                    manifest = %path.display(),
                    lanes = lanes.len(),
                    "Run described by local manifest",
                );
                return Ok(RunDescriptor {
                    flowcell: flowcell.clone(),
                    run_id: String::new(),
                    lanes,
                });
            }
            tracing::warn!(
                manifest = %path.display(),
                "Run manifest not found, querying metadata service",
            );
        }

        let source = self.source.as_ref().ok_or_else(|| {
            PipelineError::Config(
                "no run manifest given and galaxy_url/galaxy_api_key are not configured".into(),
            )
        })?;

        let (run_id, lanes) = source.lanes(flowcell).await?;
        let lanes = manifest::normalize(lanes)?;
        tracing::info!(
            flowcell = %flowcell.name,
            run_id = %run_id,
            lanes = lanes.len(),
            "Run described by metadata service",
        );
        Ok(RunDescriptor {
            flowcell: flowcell.clone(),
            run_id,
            lanes,
        })
    }
}
