//! Publish/collect side of distributed execution.
//!
//! Every item becomes one [`TaskEnvelope`] on the shared task queue. The
//! runner then blocks on a reply queue unique to this call until it holds
//! exactly one reply per submitted correlation id, so fan-out and fan-in
//! cardinality always match.
//!
//! The reply queue is held open by a lease for the duration of the call.
//! When a call fails, tasks still waiting on the task queue are withdrawn
//! and the reply queue is closed, so late answers from tasks already
//! running are dropped by the queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use seqrun_core::{DirectoryContext, WorkItem};

use crate::envelope::{ReplyEnvelope, ReplyOutcome, TaskEnvelope};
use crate::error::DispatchError;
use crate::queue::MessageQueue;

/// How long one blocking pop on the reply queue waits.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Reply queue lease, renewed well before it lapses.
const REPLY_LEASE: Duration = Duration::from_secs(60);
const LEASE_RENEWAL: Duration = Duration::from_secs(15);

/// A published task still waiting for its reply.
struct Pending {
    index: usize,
    payload: Vec<u8>,
}

/// Name of the shared task queue for `queue_name`.
pub fn task_queue_name(queue_name: &str) -> String {
    format!("{queue_name}:tasks")
}

#[derive(Clone)]
pub struct DistributedRunner {
    queue: Arc<dyn MessageQueue>,
    queue_name: String,
    reply_timeout: Option<Duration>,
    poll_interval: Duration,
}

impl DistributedRunner {
    pub fn new(queue: Arc<dyn MessageQueue>, queue_name: impl Into<String>) -> Self {
        Self {
            queue,
            queue_name: queue_name.into(),
            reply_timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Fail the call when no reply arrives for `timeout`. Without it the
    /// runner waits indefinitely, since worker fleet size is unknown here.
    pub fn with_reply_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn task_queue(&self) -> String {
        task_queue_name(&self.queue_name)
    }

    /// Publish `items` for `stage` and collect one reply per item.
    pub async fn run(
        &self,
        stage: &str,
        items: Vec<WorkItem>,
        dirs: &DirectoryContext,
    ) -> Result<Vec<WorkItem>, DispatchError> {
        let call_id = Uuid::now_v7();
        let reply_to = format!("{}:reply:{call_id}", self.queue_name);
        let mut pending = HashMap::with_capacity(items.len());

        let result = self
            .publish_and_collect(stage, items, dirs, &reply_to, &mut pending)
            .await;

        if result.is_err() && !pending.is_empty() {
            self.withdraw(stage, &pending).await;
        }
        // The reply queue is private to this call; never leave it behind.
        if let Err(e) = self.queue.discard(&reply_to).await {
            tracing::warn!(reply_to = %reply_to, error = %e, "Failed to remove reply queue");
        }
        result
    }

    /// Take back tasks no worker has picked up yet.
    async fn withdraw(&self, stage: &str, pending: &HashMap<Uuid, Pending>) {
        let task_queue = self.task_queue();
        let mut withdrawn = 0;
        for task in pending.values() {
            match self.queue.withdraw(&task_queue, &task.payload).await {
                Ok(true) => withdrawn += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(stage, error = %e, "Failed to withdraw pending tasks");
                    break;
                }
            }
        }
        tracing::info!(
            stage,
            withdrawn,
            in_flight = pending.len() - withdrawn,
            "Withdrew unstarted tasks of failed call",
        );
    }

    async fn publish_and_collect(
        &self,
        stage: &str,
        items: Vec<WorkItem>,
        dirs: &DirectoryContext,
        reply_to: &str,
        pending: &mut HashMap<Uuid, Pending>,
    ) -> Result<Vec<WorkItem>, DispatchError> {
        let task_queue = self.task_queue();
        self.queue
            .open(reply_to, REPLY_LEASE)
            .await
            .map_err(|e| DispatchError::queue(stage, e))?;
        let mut renewed = Instant::now();

        for (index, item) in items.into_iter().enumerate() {
            let envelope = TaskEnvelope {
                correlation_id: Uuid::new_v4(),
                stage: stage.to_string(),
                item,
                dirs: dirs.clone(),
                reply_to: reply_to.to_string(),
            };
            let payload =
                serde_json::to_vec(&envelope).map_err(|e| DispatchError::transport(stage, e))?;
            self.queue
                .push(&task_queue, payload.clone())
                .await
                .map_err(|e| DispatchError::queue(stage, e))?;
            pending.insert(envelope.correlation_id, Pending { index, payload });
        }

        tracing::debug!(
            stage,
            submitted = pending.len(),
            task_queue = %task_queue,
            reply_to = %reply_to,
            "Published stage tasks",
        );

        let mut results = Vec::new();
        let mut last_reply = Instant::now();

        while !pending.is_empty() {
            if renewed.elapsed() >= LEASE_RENEWAL {
                self.queue
                    .open(reply_to, REPLY_LEASE)
                    .await
                    .map_err(|e| DispatchError::queue(stage, e))?;
                renewed = Instant::now();
            }

            let popped = self
                .queue
                .pop(reply_to, self.poll_interval)
                .await
                .map_err(|e| DispatchError::queue(stage, e))?;

            let Some(raw) = popped else {
                if let Some(timeout) = self.reply_timeout {
                    if last_reply.elapsed() >= timeout {
                        return Err(DispatchError::ReplyTimeout {
                            stage: stage.to_string(),
                            outstanding: pending.len(),
                        });
                    }
                }
                continue;
            };
            last_reply = Instant::now();

            let reply: ReplyEnvelope = match serde_json::from_slice(&raw) {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::warn!(stage, error = %e, "Ignoring malformed reply");
                    continue;
                }
            };
            let Some(Pending { index, .. }) = pending.remove(&reply.correlation_id) else {
                tracing::warn!(
                    stage,
                    correlation_id = %reply.correlation_id,
                    "Ignoring reply with unknown or duplicate correlation id",
                );
                continue;
            };

            match reply.outcome {
                ReplyOutcome::Ok { results: Some(produced) } => results.extend(produced),
                ReplyOutcome::Ok { results: None } => {}
                ReplyOutcome::Failed { error } => {
                    tracing::error!(
                        stage,
                        item = index,
                        outstanding = pending.len(),
                        error = %error,
                        "Remote stage failed, discarding collected results",
                    );
                    return Err(DispatchError::StageFailed {
                        stage: stage.to_string(),
                        item: index,
                        message: error,
                    });
                }
            }
        }

        Ok(results)
    }
}

impl std::fmt::Debug for DistributedRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedRunner")
            .field("queue_name", &self.queue_name)
            .field("reply_timeout", &self.reply_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::queue::InMemoryQueue;

    fn runner(queue: &Arc<InMemoryQueue>) -> DistributedRunner {
        DistributedRunner::new(Arc::clone(queue) as Arc<dyn MessageQueue>, "test")
            .with_poll_interval(Duration::from_millis(10))
    }

    /// Answer every queued task with `reply`, without running any stage.
    async fn answer_all(
        queue: &InMemoryQueue,
        reply: impl Fn(&TaskEnvelope) -> ReplyEnvelope,
    ) -> usize {
        let mut answered = 0;
        while let Some(raw) = queue.pop("test:tasks", Duration::from_millis(200)).await.unwrap() {
            let task: TaskEnvelope = serde_json::from_slice(&raw).unwrap();
            let payload = serde_json::to_vec(&reply(&task)).unwrap();
            queue.push_reply(&task.reply_to, payload).await.unwrap();
            answered += 1;
        }
        answered
    }

    #[tokio::test]
    async fn collects_one_reply_per_item_and_cleans_up() {
        let queue = Arc::new(InMemoryQueue::new());
        let runner = runner(&queue);
        let items = vec![WorkItem(json!(1)), WorkItem(json!(2))];
        let dirs = DirectoryContext::from_paths([]);

        let (result, answered) = tokio::join!(
            runner.run("s", items, &dirs),
            answer_all(&queue, |task| {
                ReplyEnvelope::ok(task.correlation_id, Some(vec![task.item.clone()]))
            }),
        );

        assert_eq!(answered, 2);
        assert_eq!(result.unwrap().len(), 2);
        assert!(queue.queue_names().is_empty());
    }

    #[tokio::test]
    async fn stray_replies_are_ignored() {
        let queue = Arc::new(InMemoryQueue::new());
        let runner = runner(&queue);
        let dirs = DirectoryContext::from_paths([]);

        let (result, _) = tokio::join!(
            runner.run("s", vec![WorkItem(json!("x"))], &dirs),
            async {
                let raw = queue
                    .pop("test:tasks", Duration::from_secs(1))
                    .await
                    .unwrap()
                    .unwrap();
                let task: TaskEnvelope = serde_json::from_slice(&raw).unwrap();
                let stray = ReplyEnvelope::ok(Uuid::new_v4(), Some(vec![WorkItem(json!("bogus"))]));
                queue
                    .push_reply(&task.reply_to, serde_json::to_vec(&stray).unwrap())
                    .await
                    .unwrap();
                queue.push_reply(&task.reply_to, b"not json".to_vec()).await.unwrap();
                let real = ReplyEnvelope::ok(task.correlation_id, None);
                queue
                    .push_reply(&task.reply_to, serde_json::to_vec(&real).unwrap())
                    .await
                    .unwrap();
            },
        );

        assert!(result.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_reply_fails_the_call() {
        let queue = Arc::new(InMemoryQueue::new());
        let runner = runner(&queue);
        let dirs = DirectoryContext::from_paths([]);

        let (result, _) = tokio::join!(
            runner.run("process_sample", vec![WorkItem(json!(0))], &dirs),
            answer_all(&queue, |task| ReplyEnvelope::failed(task.correlation_id, "exit 2")),
        );

        assert_matches!(
            result,
            Err(DispatchError::StageFailed { item: 0, message, .. }) if message == "exit 2"
        );
        assert!(queue.queue_names().is_empty());
    }

    #[tokio::test]
    async fn failed_call_withdraws_unstarted_tasks_and_closes_replies() {
        let queue = Arc::new(InMemoryQueue::new());
        let runner = runner(&queue);
        let dirs = DirectoryContext::from_paths([]);
        let items = (0..5).map(|i| WorkItem(json!(i))).collect();

        let (result, late) = tokio::join!(runner.run("s", items, &dirs), async {
            // Take two tasks: fail the first, keep the second "running".
            let mut taken = Vec::new();
            for _ in 0..2 {
                let raw = queue
                    .pop("test:tasks", Duration::from_secs(1))
                    .await
                    .unwrap()
                    .unwrap();
                taken.push(serde_json::from_slice::<TaskEnvelope>(&raw).unwrap());
            }
            let failed = ReplyEnvelope::failed(taken[0].correlation_id, "boom");
            queue
                .push_reply(&taken[0].reply_to, serde_json::to_vec(&failed).unwrap())
                .await
                .unwrap();
            taken.pop().unwrap()
        });
        assert_matches!(result, Err(DispatchError::StageFailed { .. }));

        // The remaining three never reach a worker.
        assert_eq!(queue.len("test:tasks"), 0);

        // The in-flight task finishes after the call is gone.
        let reply = ReplyEnvelope::ok(late.correlation_id, None);
        let kept = queue
            .push_reply(&late.reply_to, serde_json::to_vec(&reply).unwrap())
            .await
            .unwrap();
        assert!(!kept);
        assert!(queue.queue_names().is_empty());
    }

    #[tokio::test]
    async fn silent_fleet_times_out() {
        let queue = Arc::new(InMemoryQueue::new());
        let runner = runner(&queue).with_reply_timeout(Some(Duration::from_millis(50)));
        let dirs = DirectoryContext::from_paths([]);

        let result = runner.run("s", vec![WorkItem(json!(0))], &dirs).await;
        assert_matches!(result, Err(DispatchError::ReplyTimeout { outstanding: 1, .. }));
        assert!(queue.queue_names().is_empty());
    }
}
