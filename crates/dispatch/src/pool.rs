//! Bounded local execution.
//!
//! A [`WorkerPool`] owns at most `n` Tokio tasks per [`run`](WorkerPool::run)
//! call. Workers pull items from one shared queue, so no more than `n` stage
//! invocations are ever in flight. The first failure cancels the pool's token:
//! workers stop pulling new items, in-flight siblings finish and their
//! results are discarded.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use seqrun_core::WorkItem;

use crate::error::DispatchError;
use crate::stage::{StageContext, StageHandler};

type ItemQueue = Arc<Mutex<VecDeque<(usize, WorkItem)>>>;

/// What one worker task hands back when it stops.
enum WorkerExit {
    Drained { results: Vec<WorkItem>, completed: usize },
    Failed { item: usize, message: String, completed: usize },
}

pub struct WorkerPool {
    size: NonZeroUsize,
    workers: JoinSet<WorkerExit>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Create a pool of `size` workers. No tasks exist until `run`.
    pub fn acquire(size: NonZeroUsize) -> Self {
        Self {
            size,
            workers: JoinSet::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size.get()
    }

    /// Run `handler` over every item and return the concatenated results.
    ///
    /// Items whose handler returns the "no result" sentinel or an empty list
    /// contribute nothing. Any failure fails the whole call.
    pub async fn run(
        &mut self,
        stage: &str,
        handler: Arc<dyn StageHandler>,
        items: Vec<WorkItem>,
        ctx: &StageContext,
    ) -> Result<Vec<WorkItem>, DispatchError> {
        let total = items.len();
        let queue: ItemQueue = Arc::new(Mutex::new(items.into_iter().enumerate().collect()));
        let cancel = self.cancel.child_token();

        for _ in 0..self.size.get().min(total) {
            self.workers.spawn(work(
                Arc::clone(&queue),
                Arc::clone(&handler),
                ctx.clone(),
                cancel.clone(),
            ));
        }

        let mut results = Vec::new();
        let mut completed = 0;
        let mut failure: Option<DispatchError> = None;

        while let Some(joined) = self.workers.join_next().await {
            match joined {
                Ok(WorkerExit::Drained {
                    results: produced,
                    completed: n,
                }) => {
                    completed += n;
                    results.extend(produced);
                }
                Ok(WorkerExit::Failed {
                    item,
                    message,
                    completed: n,
                }) => {
                    completed += n;
                    failure.get_or_insert(DispatchError::StageFailed {
                        stage: stage.to_string(),
                        item,
                        message,
                    });
                }
                Err(e) => {
                    cancel.cancel();
                    failure.get_or_insert(DispatchError::WorkerLost {
                        stage: stage.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if let Some(err) = failure {
            tracing::error!(
                stage,
                total,
                completed,
                error = %err,
                "Local stage failed, discarding completed results",
            );
            return Err(err);
        }
        Ok(results)
    }

    /// Stop any remaining workers and wait for them to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        self.workers.abort_all();
        while self.workers.join_next().await.is_some() {}
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.workers.abort_all();
    }
}

async fn work(
    queue: ItemQueue,
    handler: Arc<dyn StageHandler>,
    ctx: StageContext,
    cancel: CancellationToken,
) -> WorkerExit {
    let mut results = Vec::new();
    let mut completed = 0;

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let next = queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        let Some((index, item)) = next else { break };

        let outcome = AssertUnwindSafe(handler.run(item, &ctx))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(Some(produced))) => results.extend(produced),
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                cancel.cancel();
                return WorkerExit::Failed {
                    item: index,
                    message: e.message,
                    completed,
                };
            }
            Err(_) => {
                cancel.cancel();
                return WorkerExit::Failed {
                    item: index,
                    message: "stage function panicked".to_string(),
                    completed,
                };
            }
        }
        completed += 1;
    }

    WorkerExit::Drained { results, completed }
}
