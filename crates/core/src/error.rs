/// Error taxonomy shared by every pipeline stage.
///
/// Every variant except [`PipelineError::EmptySampleResult`] (under the
/// default `warn` policy) and [`PipelineError::Integration`] is fatal and
/// unwinds to the entry point, which exits with a non-zero status.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Upstream metadata service unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Stage '{stage}' failed: {message}")]
    StageExecution { stage: String, message: String },

    #[error("No lane results for samples: {}", samples.join(", "))]
    EmptySampleResult { samples: Vec<String> },

    #[error("Integration failure: {0}")]
    Integration(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    /// Build an [`PipelineError::Io`] tagged with the path being accessed.
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Whether the pipeline may continue after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Integration(_))
    }
}

impl From<serde_yaml::Error> for PipelineError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config(err.to_string())
    }
}
