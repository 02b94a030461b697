//! Consuming side of distributed execution, run by remote worker processes.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use seqrun_core::PipelineConfig;

use crate::distributed::task_queue_name;
use crate::envelope::{ReplyEnvelope, TaskEnvelope};
use crate::queue::MessageQueue;
use crate::registry::StageRegistry;
use crate::stage::StageContext;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Back-off after a queue error before polling again.
const ERROR_BACKOFF: Duration = Duration::from_secs(2);

/// Pulls task envelopes, runs the named registered stage and publishes the
/// reply. Stage names not in the registry are answered with a failure and
/// never executed.
pub struct QueueWorker {
    queue: Arc<dyn MessageQueue>,
    registry: Arc<StageRegistry>,
    config: Arc<PipelineConfig>,
    task_queue: String,
    poll_interval: Duration,
}

impl QueueWorker {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        registry: Arc<StageRegistry>,
        config: Arc<PipelineConfig>,
        queue_name: &str,
    ) -> Self {
        Self {
            queue,
            registry,
            config,
            task_queue: task_queue_name(queue_name),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Consume tasks until `cancel` fires. Returns the number of tasks handled.
    ///
    /// Cancellation is checked between polls; a task already popped is always
    /// run to completion and answered.
    pub async fn serve(&self, cancel: CancellationToken) -> u64 {
        tracing::info!(task_queue = %self.task_queue, "Queue worker started");
        let mut handled = 0;

        while !cancel.is_cancelled() {
            match self.queue.pop(&self.task_queue, self.poll_interval).await {
                Ok(Some(raw)) => {
                    self.handle(&raw).await;
                    handled += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Failed to poll task queue");
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        tracing::info!(handled, "Queue worker shutting down");
        handled
    }

    /// Execute one raw task envelope and publish its reply.
    pub async fn handle(&self, raw: &[u8]) {
        let task: TaskEnvelope = match serde_json::from_slice(raw) {
            Ok(task) => task,
            Err(e) => {
                // Without a parsable envelope there is no reply queue to answer.
                tracing::error!(error = %e, "Dropping malformed task envelope");
                return;
            }
        };

        let correlation_id = task.correlation_id;
        let reply = match self.execute(task.stage.clone(), task.item, task.dirs).await {
            Ok(results) => ReplyEnvelope::ok(correlation_id, results),
            Err(message) => {
                tracing::warn!(
                    stage = %task.stage,
                    correlation_id = %correlation_id,
                    error = %message,
                    "Stage task failed",
                );
                ReplyEnvelope::failed(correlation_id, message)
            }
        };

        let payload = match serde_json::to_vec(&reply) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(correlation_id = %correlation_id, error = %e, "Failed to encode reply");
                return;
            }
        };
        match self.queue.push_reply(&task.reply_to, payload).await {
            Ok(true) => {}
            Ok(false) => tracing::info!(
                correlation_id = %correlation_id,
                reply_to = %task.reply_to,
                "Reply queue closed, the call was abandoned; dropping reply",
            ),
            Err(e) => tracing::error!(
                correlation_id = %correlation_id,
                reply_to = %task.reply_to,
                error = %e,
                "Failed to publish reply",
            ),
        }
    }

    async fn execute(
        &self,
        stage: String,
        item: seqrun_core::WorkItem,
        dirs: seqrun_core::DirectoryContext,
    ) -> Result<crate::stage::StageOutcome, String> {
        let handler = self.registry.get(&stage).map_err(|e| e.to_string())?;
        let ctx = StageContext::new(Arc::new(dirs), Arc::clone(&self.config));

        tracing::debug!(stage = %stage, "Running stage task");
        // A panicking stage must still produce a reply.
        tokio::spawn(async move { handler.run(item, &ctx).await })
            .await
            .map_err(|e| format!("stage task aborted: {e}"))?
            .map_err(|e| e.message)
    }
}
