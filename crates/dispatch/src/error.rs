use seqrun_core::PipelineError;

use crate::queue::QueueError;

/// Errors from a dispatcher call.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The stage name is not in the static registry.
    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    #[error("Stage already registered: {0}")]
    DuplicateStage(String),

    /// A unit of work returned an error (or its worker panicked).
    #[error("Stage '{stage}' failed on item {item}: {message}")]
    StageFailed {
        stage: String,
        item: usize,
        message: String,
    },

    /// A local worker task was aborted before reporting back.
    #[error("Stage '{stage}' worker terminated: {message}")]
    WorkerLost { stage: String, message: String },

    /// Distributed mode stopped receiving replies.
    #[error("Stage '{stage}' timed out waiting for {outstanding} replies")]
    ReplyTimeout { stage: String, outstanding: usize },

    /// Queue or payload encoding failure while shipping work.
    #[error("Stage '{stage}' transport error: {message}")]
    Transport { stage: String, message: String },
}

impl DispatchError {
    pub(crate) fn transport(stage: &str, err: impl std::fmt::Display) -> Self {
        Self::Transport {
            stage: stage.to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn queue(stage: &str, err: QueueError) -> Self {
        Self::transport(stage, err)
    }
}

impl From<DispatchError> for PipelineError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::UnknownStage(_) | DispatchError::DuplicateStage(_) => {
                PipelineError::Config(err.to_string())
            }
            DispatchError::StageFailed { ref stage, .. }
            | DispatchError::WorkerLost { ref stage, .. }
            | DispatchError::ReplyTimeout { ref stage, .. }
            | DispatchError::Transport { ref stage, .. } => PipelineError::StageExecution {
                stage: stage.clone(),
                message: err.to_string(),
            },
        }
    }
}
