//! Named FIFO queues carrying opaque byte payloads.
//!
//! The distributed runner publishes task envelopes to one shared task queue
//! and collects replies from a per-call reply queue. A reply queue only
//! accepts replies while its call holds it open, so answers to an abandoned
//! call are dropped instead of piling up. Any broker that offers push,
//! blocking pop, delete and an atomic check-and-push on named lists can
//! back it.

mod memory;
mod redis_list;

use std::time::Duration;

use async_trait::async_trait;

pub use self::memory::InMemoryQueue;
pub use self::redis_list::RedisQueue;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue connection failed: {0}")]
    Connect(String),

    #[error("Queue command failed: {0}")]
    Command(String),
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Append `payload` to `queue`.
    async fn push(&self, queue: &str, payload: Vec<u8>) -> Result<(), QueueError>;

    /// Remove and return the oldest message, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when the wait expires with the queue still empty.
    /// A popped message is gone; there is no acknowledgement or redelivery.
    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<Vec<u8>>, QueueError>;

    /// Remove one message equal to `payload` from `queue`. Returns `false`
    /// when it was no longer there, e.g. because a consumer already took it.
    async fn withdraw(&self, queue: &str, payload: &[u8]) -> Result<bool, QueueError>;

    /// Hold `queue` open for replies for at least `lease`. Calling again
    /// extends the lease.
    async fn open(&self, queue: &str, lease: Duration) -> Result<(), QueueError>;

    /// Append `payload` to `queue` if it is still open. Returns `false` when
    /// the reply was dropped.
    async fn push_reply(&self, queue: &str, payload: Vec<u8>) -> Result<bool, QueueError>;

    /// Close `queue` and drop anything left in it.
    async fn discard(&self, queue: &str) -> Result<(), QueueError>;
}
