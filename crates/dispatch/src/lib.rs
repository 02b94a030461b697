//! Stage dispatch: run one registered unit-of-work function over a set of
//! work items, either in a bounded local worker pool or through a message
//! queue consumed by remote workers.
//!
//! - [`StageRegistry`]: the static name → handler table built at startup.
//! - [`StageHandler`]: the fixed signature every unit of work implements.
//! - [`WorkerPool`]: bounded local execution with an explicit lifecycle.
//! - [`DistributedRunner`]: publish/collect over a [`MessageQueue`].
//! - [`QueueWorker`]: the consuming side run by remote worker processes.
//! - [`Dispatcher`]: the single entry point used by the pipeline.
//!
//! Both modes share the same guarantees: every item runs exactly once per
//! call, results come back as an unordered multiset, and any item failure
//! fails the whole call.

pub mod dispatcher;
pub mod distributed;
pub mod envelope;
pub mod error;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod stage;
pub mod worker;

pub use dispatcher::{Dispatcher, ExecutionMode};
pub use distributed::DistributedRunner;
pub use error::DispatchError;
pub use pool::WorkerPool;
pub use queue::{InMemoryQueue, MessageQueue, QueueError, RedisQueue};
pub use registry::StageRegistry;
pub use stage::{stage_fn, StageContext, StageError, StageHandler, StageOutcome};
pub use worker::QueueWorker;
