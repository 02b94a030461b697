use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{MessageQueue, QueueError};

/// Process-local queue used when producers and consumers share a runtime,
/// mainly in tests.
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    state: Mutex<State>,
    notify: Notify,
}

#[derive(Debug, Default)]
struct State {
    queues: HashMap<String, VecDeque<Vec<u8>>>,
    /// Reply queues held open, with their lease expiry.
    open: HashMap<String, Instant>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages waiting in `queue`.
    pub fn len(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, VecDeque::len)
    }

    /// Names of queues holding messages or an open reply lease.
    pub fn queue_names(&self) -> Vec<String> {
        let state = self.lock();
        let mut names: Vec<_> = state
            .queues
            .keys()
            .chain(state.open.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned map is still structurally valid.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn try_pop(&self, queue: &str) -> Option<Vec<u8>> {
        let mut state = self.lock();
        let entries = state.queues.get_mut(queue)?;
        let message = entries.pop_front();
        if entries.is_empty() {
            state.queues.remove(queue);
        }
        message
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn push(&self, queue: &str, payload: Vec<u8>) -> Result<(), QueueError> {
        self.lock()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(payload);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<Vec<u8>>, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a push in between is not missed.
            notified.as_mut().enable();

            if let Some(message) = self.try_pop(queue) {
                return Ok(Some(message));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(self.try_pop(queue));
            }
        }
    }

    async fn withdraw(&self, queue: &str, payload: &[u8]) -> Result<bool, QueueError> {
        let mut state = self.lock();
        let Some(entries) = state.queues.get_mut(queue) else {
            return Ok(false);
        };
        let Some(position) = entries.iter().position(|m| m == payload) else {
            return Ok(false);
        };
        entries.remove(position);
        if entries.is_empty() {
            state.queues.remove(queue);
        }
        Ok(true)
    }

    async fn open(&self, queue: &str, lease: Duration) -> Result<(), QueueError> {
        self.lock()
            .open
            .insert(queue.to_string(), Instant::now() + lease);
        Ok(())
    }

    async fn push_reply(&self, queue: &str, payload: Vec<u8>) -> Result<bool, QueueError> {
        {
            let mut state = self.lock();
            match state.open.get(queue) {
                Some(expiry) if *expiry > Instant::now() => {}
                Some(_) => {
                    state.open.remove(queue);
                    return Ok(false);
                }
                None => return Ok(false),
            }
            state
                .queues
                .entry(queue.to_string())
                .or_default()
                .push_back(payload);
        }
        self.notify.notify_waiters();
        Ok(true)
    }

    async fn discard(&self, queue: &str) -> Result<(), QueueError> {
        let mut state = self.lock();
        state.queues.remove(queue);
        state.open.remove(queue);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn messages_come_out_in_fifo_order() {
        let queue = InMemoryQueue::new();
        queue.push("q", b"one".to_vec()).await.unwrap();
        queue.push("q", b"two".to_vec()).await.unwrap();

        let wait = Duration::from_millis(10);
        assert_eq!(queue.pop("q", wait).await.unwrap().unwrap(), b"one");
        assert_eq!(queue.pop("q", wait).await.unwrap().unwrap(), b"two");
        assert!(queue.pop("q", wait).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pop_wakes_on_later_push() {
        let queue = Arc::new(InMemoryQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop("q", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push("q", b"late".to_vec()).await.unwrap();

        let got = consumer.await.unwrap().unwrap();
        assert_eq!(got.as_deref(), Some(&b"late"[..]));
    }

    #[tokio::test]
    async fn discard_drops_pending_messages() {
        let queue = InMemoryQueue::new();
        queue.push("reply", b"x".to_vec()).await.unwrap();
        queue.discard("reply").await.unwrap();
        assert_eq!(queue.len("reply"), 0);
        assert!(queue.queue_names().is_empty());
    }

    #[tokio::test]
    async fn withdraw_removes_one_matching_message() {
        let queue = InMemoryQueue::new();
        queue.push("tasks", b"a".to_vec()).await.unwrap();
        queue.push("tasks", b"b".to_vec()).await.unwrap();

        assert!(queue.withdraw("tasks", b"a").await.unwrap());
        assert!(!queue.withdraw("tasks", b"a").await.unwrap());
        assert!(queue.withdraw("tasks", b"b").await.unwrap());
        assert!(queue.queue_names().is_empty());
    }

    // -- reply leases ---------------------------------------------------------

    #[tokio::test]
    async fn replies_need_an_open_queue() {
        let queue = InMemoryQueue::new();
        assert!(!queue.push_reply("reply", b"early".to_vec()).await.unwrap());
        assert!(queue.queue_names().is_empty());

        queue.open("reply", Duration::from_secs(60)).await.unwrap();
        assert!(queue.push_reply("reply", b"on time".to_vec()).await.unwrap());
        assert_eq!(queue.len("reply"), 1);

        queue.discard("reply").await.unwrap();
        assert!(!queue.push_reply("reply", b"late".to_vec()).await.unwrap());
        assert!(queue.queue_names().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn lapsed_lease_drops_replies() {
        let queue = InMemoryQueue::new();
        queue.open("reply", Duration::from_secs(1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        assert!(!queue.push_reply("reply", b"x".to_vec()).await.unwrap());
        assert!(queue.queue_names().is_empty());
    }
}
