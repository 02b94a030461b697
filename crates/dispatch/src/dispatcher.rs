use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use seqrun_core::config::Parallelism;
use seqrun_core::{PipelineConfig, WorkItem};

use crate::distributed::DistributedRunner;
use crate::error::DispatchError;
use crate::pool::WorkerPool;
use crate::queue::{MessageQueue, QueueError, RedisQueue};
use crate::registry::StageRegistry;
use crate::stage::StageContext;

/// Where stage invocations execute.
#[derive(Debug, Clone)]
pub enum ExecutionMode {
    /// A pool of exactly `n` local workers.
    LocalPool(NonZeroUsize),
    /// Remote workers reached through a message queue.
    Distributed(DistributedRunner),
}

impl ExecutionMode {
    /// Select the mode named by `algorithm.num_cores`, connecting to the
    /// message queue when distributed execution is requested.
    pub async fn from_config(config: &PipelineConfig) -> Result<Self, QueueError> {
        match config.algorithm.num_cores {
            Parallelism::Local(n) => Ok(Self::LocalPool(n)),
            Parallelism::Messaging => {
                let settings = &config.distributed;
                let queue = RedisQueue::connect(&settings.queue_url).await?;
                let runner = DistributedRunner::new(
                    Arc::new(queue) as Arc<dyn MessageQueue>,
                    settings.queue_name.clone(),
                )
                .with_reply_timeout(settings.reply_timeout_secs.map(Duration::from_secs));
                Ok(Self::Distributed(runner))
            }
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::LocalPool(n) => format!("local({n})"),
            Self::Distributed(_) => "distributed".to_string(),
        }
    }
}

/// Runs one registered stage over a batch of work items.
///
/// The call blocks until every item has finished and returns the concatenated
/// results as an unordered multiset. It is all-or-nothing: any failing item
/// fails the call and no partial results are returned.
pub struct Dispatcher {
    registry: Arc<StageRegistry>,
    mode: ExecutionMode,
    ctx: StageContext,
}

impl Dispatcher {
    pub fn new(registry: Arc<StageRegistry>, mode: ExecutionMode, ctx: StageContext) -> Self {
        Self {
            registry,
            mode,
            ctx,
        }
    }

    pub fn mode(&self) -> &ExecutionMode {
        &self.mode
    }

    pub fn context(&self) -> &StageContext {
        &self.ctx
    }

    pub async fn run(
        &self,
        stage: &str,
        items: Vec<WorkItem>,
    ) -> Result<Vec<WorkItem>, DispatchError> {
        self.run_with_mode(stage, items, &self.mode).await
    }

    pub async fn run_with_mode(
        &self,
        stage: &str,
        items: Vec<WorkItem>,
        mode: &ExecutionMode,
    ) -> Result<Vec<WorkItem>, DispatchError> {
        // Resolve first so unknown names fail before anything is scheduled.
        let handler = self.registry.get(stage)?;
        let submitted = items.len();
        if submitted == 0 {
            tracing::info!(stage, "No work items, skipping stage");
            return Ok(Vec::new());
        }

        tracing::info!(stage, items = submitted, mode = %mode.label(), "Dispatching stage");
        let started = Instant::now();

        let results = match mode {
            ExecutionMode::LocalPool(n) => {
                let mut pool = WorkerPool::acquire(*n);
                let outcome = pool.run(stage, handler, items, &self.ctx).await;
                pool.shutdown().await;
                outcome?
            }
            ExecutionMode::Distributed(runner) => {
                runner.run(stage, items, &self.ctx.dirs).await?
            }
        };

        tracing::info!(
            stage,
            items = submitted,
            results = results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Stage complete",
        );
        Ok(results)
    }
}
