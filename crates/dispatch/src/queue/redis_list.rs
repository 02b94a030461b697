use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, Script};

use super::{MessageQueue, QueueError};

/// How long an unconsumed reply list survives its last push.
const REPLY_TTL: Duration = Duration::from_secs(60 * 60);

/// LPUSH onto KEYS[1] only while the lease key KEYS[2] exists, and bound
/// the list's lifetime so a reply racing a DEL cannot linger.
const PUSH_IF_OPEN: &str = r"
if redis.call('EXISTS', KEYS[2]) == 0 then
    return 0
end
redis.call('LPUSH', KEYS[1], ARGV[1])
redis.call('PEXPIRE', KEYS[1], ARGV[2])
return 1
";

/// Redis-backed queues: each queue is a list, pushed with `LPUSH` and
/// consumed with `BRPOP`. A reply queue is open while `<queue>:open` exists.
///
/// Each concurrent `BRPOP` checks out its own connection, since a blocking
/// command stalls everything else multiplexed on the same one. Idle blocking
/// connections are kept for reuse.
pub struct RedisQueue {
    url: String,
    client: Client,
    commands: MultiplexedConnection,
    idle: Mutex<Vec<MultiplexedConnection>>,
    push_if_open: Script,
}

impl RedisQueue {
    pub async fn connect(url: &str) -> Result<Self, QueueError> {
        let client = Client::open(url)
            .map_err(|e| QueueError::Connect(format!("Invalid queue URL {url}: {e}")))?;
        let commands = open(&client, url).await?;

        tracing::info!(url = %url, "Connected to message queue");
        Ok(Self {
            url: url.to_string(),
            client,
            commands,
            idle: Mutex::new(Vec::new()),
            push_if_open: Script::new(PUSH_IF_OPEN),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn checkout(&self) -> Result<MultiplexedConnection, QueueError> {
        let reused = self.idle.lock().unwrap_or_else(|e| e.into_inner()).pop();
        match reused {
            Some(conn) => Ok(conn),
            None => open(&self.client, &self.url).await,
        }
    }

    fn checkin(&self, conn: MultiplexedConnection) {
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).push(conn);
    }
}

async fn open(client: &Client, url: &str) -> Result<MultiplexedConnection, QueueError> {
    client
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| QueueError::Connect(format!("Failed to connect to {url}: {e}")))
}

fn lease_key(queue: &str) -> String {
    format!("{queue}:open")
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn command_error(op: &str, queue: &str, err: redis::RedisError) -> QueueError {
    QueueError::Command(format!("{op} {queue}: {err}"))
}

#[async_trait]
impl MessageQueue for RedisQueue {
    async fn push(&self, queue: &str, payload: Vec<u8>) -> Result<(), QueueError> {
        let mut conn = self.commands.clone();
        let _: i64 = redis::cmd("LPUSH")
            .arg(queue)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("LPUSH", queue, e))?;
        Ok(())
    }

    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<Vec<u8>>, QueueError> {
        // BRPOP treats 0 as "block forever".
        let seconds = timeout.as_secs_f64().max(0.01);
        let mut conn = self.checkout().await?;
        let popped: Option<(String, Vec<u8>)> = redis::cmd("BRPOP")
            .arg(queue)
            .arg(seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("BRPOP", queue, e))?;
        self.checkin(conn);
        Ok(popped.map(|(_, payload)| payload))
    }

    async fn withdraw(&self, queue: &str, payload: &[u8]) -> Result<bool, QueueError> {
        let mut conn = self.commands.clone();
        let removed: i64 = redis::cmd("LREM")
            .arg(queue)
            .arg(1)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("LREM", queue, e))?;
        Ok(removed > 0)
    }

    async fn open(&self, queue: &str, lease: Duration) -> Result<(), QueueError> {
        let mut conn = self.commands.clone();
        let key = lease_key(queue);
        let _: () = redis::cmd("SET")
            .arg(&key)
            .arg(1)
            .arg("PX")
            .arg(millis(lease))
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("SET", &key, e))?;
        Ok(())
    }

    async fn push_reply(&self, queue: &str, payload: Vec<u8>) -> Result<bool, QueueError> {
        let mut conn = self.commands.clone();
        let pushed: i64 = self
            .push_if_open
            .key(queue)
            .key(lease_key(queue))
            .arg(payload)
            .arg(millis(REPLY_TTL))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| command_error("EVALSHA", queue, e))?;
        Ok(pushed == 1)
    }

    async fn discard(&self, queue: &str) -> Result<(), QueueError> {
        let mut conn = self.commands.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(queue)
            .arg(lease_key(queue))
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("DEL", queue, e))?;
        Ok(())
    }
}
