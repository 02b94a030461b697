//! Unit-of-work signature shared by every registered stage.
//!
//! A stage handler receives one opaque [`WorkItem`] plus the read-only
//! [`StageContext`] and returns either a list of result items, the
//! "no result" sentinel (`Ok(None)`), or a [`StageError`].

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use seqrun_core::{DirectoryContext, PipelineConfig, WorkItem};

/// Result of one unit of work. `None` means the item produced nothing and
/// is dropped from the stage output.
pub type StageOutcome = Option<Vec<WorkItem>>;

/// Read-only state shared by every invocation of every stage.
///
/// Cloning is cheap; both fields are reference counted. Stateful resources
/// (indexes, connections) must be opened inside the handler, never shared
/// through this context.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub dirs: Arc<DirectoryContext>,
    pub config: Arc<PipelineConfig>,
}

impl StageContext {
    pub fn new(dirs: Arc<DirectoryContext>, config: Arc<PipelineConfig>) -> Self {
        Self { dirs, config }
    }
}

/// Failure of a single unit of work.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct StageError {
    pub message: String,
}

impl StageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for StageError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("invalid stage payload: {err}"))
    }
}

/// The fixed call signature every unit of work must satisfy.
#[async_trait]
pub trait StageHandler: Send + Sync {
    async fn run(&self, item: WorkItem, ctx: &StageContext) -> Result<StageOutcome, StageError>;
}

impl std::fmt::Debug for dyn StageHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StageHandler")
    }
}

/// Adapter turning an async closure into a [`StageHandler`].
pub struct FnStage<F>(F);

/// Wrap `f` as a stage handler.
///
/// ```rust
/// use seqrun_core::WorkItem;
/// use seqrun_dispatch::{stage_fn, StageError, StageOutcome};
///
/// let double = stage_fn(|item: WorkItem, _ctx| async move {
///     let n: u64 = item.decode()?;
///     Ok::<StageOutcome, StageError>(Some(vec![WorkItem::encode(&(n * 2))?]))
/// });
/// # let _ = double;
/// ```
pub fn stage_fn<F, Fut>(f: F) -> FnStage<F>
where
    F: Fn(WorkItem, StageContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StageOutcome, StageError>> + Send,
{
    FnStage(f)
}

#[async_trait]
impl<F, Fut> StageHandler for FnStage<F>
where
    F: Fn(WorkItem, StageContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StageOutcome, StageError>> + Send,
{
    async fn run(&self, item: WorkItem, ctx: &StageContext) -> Result<StageOutcome, StageError> {
        (self.0)(item, ctx.clone()).await
    }
}
