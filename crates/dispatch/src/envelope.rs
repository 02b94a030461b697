//! Wire format exchanged between the distributed runner and queue workers.
//!
//! Task: `{correlation_id, stage, item, dirs, reply_to}`.
//! Reply: `{correlation_id, outcome: {status: "ok", results} | {status: "failed", error}}`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use seqrun_core::{DirectoryContext, WorkItem};

use crate::stage::StageOutcome;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub correlation_id: Uuid,
    pub stage: String,
    pub item: WorkItem,
    pub dirs: DirectoryContext,
    /// Queue the worker publishes its [`ReplyEnvelope`] to.
    pub reply_to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub correlation_id: Uuid,
    pub outcome: ReplyOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReplyOutcome {
    Ok {
        /// `None` is the "no result" sentinel.
        results: StageOutcome,
    },
    Failed {
        error: String,
    },
}

impl ReplyEnvelope {
    pub fn ok(correlation_id: Uuid, results: StageOutcome) -> Self {
        Self {
            correlation_id,
            outcome: ReplyOutcome::Ok { results },
        }
    }

    pub fn failed(correlation_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            correlation_id,
            outcome: ReplyOutcome::Failed {
                error: error.into(),
            },
        }
    }
}
