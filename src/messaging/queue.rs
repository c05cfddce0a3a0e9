//! Job queue abstraction
//!
//! `enqueue`/`dequeue`/`ack` over named queues with visibility-timeout
//! semantics: a dequeued message stays invisible for the timeout and is
//! redelivered unless acked. Retry policy therefore lives in the queue, not in
//! the handlers.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

use super::errors::{MessagingError, MessagingResult};

/// A message handed out by `dequeue`
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    pub msg_id: i64,
    pub read_ct: i32,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, queue_name: &str, payload: &serde_json::Value) -> MessagingResult<i64>;

    async fn dequeue(
        &self,
        queue_name: &str,
        visibility_timeout_seconds: i32,
        batch_size: i32,
    ) -> MessagingResult<Vec<QueuedJob>>;

    async fn ack(&self, queue_name: &str, msg_id: i64) -> MessagingResult<()>;
}

/// Serialize and enqueue a typed payload
pub async fn enqueue_json<T: Serialize + Sync>(
    queue: &dyn JobQueue,
    queue_name: &str,
    payload: &T,
) -> MessagingResult<i64> {
    let value = serde_json::to_value(payload).map_err(MessagingError::serialization)?;
    queue.enqueue(queue_name, &value).await
}

#[derive(Debug, Clone)]
struct StoredMessage {
    msg_id: i64,
    read_ct: i32,
    visible_at: DateTime<Utc>,
    payload: serde_json::Value,
}

#[derive(Debug, Default)]
struct QueueState {
    next_id: i64,
    queues: HashMap<String, Vec<StoredMessage>>,
}

/// Process-local queue for tests and single-process runs
#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    state: Mutex<QueueState>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unacked payloads of a queue in enqueue order, visible or not
    pub async fn messages(&self, queue_name: &str) -> Vec<serde_json::Value> {
        self.state
            .lock()
            .await
            .queues
            .get(queue_name)
            .map(|messages| messages.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn len(&self, queue_name: &str) -> usize {
        self.state
            .lock()
            .await
            .queues
            .get(queue_name)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub async fn is_empty(&self, queue_name: &str) -> bool {
        self.len(queue_name).await == 0
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, queue_name: &str, payload: &serde_json::Value) -> MessagingResult<i64> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let msg_id = state.next_id;
        state
            .queues
            .entry(queue_name.to_string())
            .or_default()
            .push(StoredMessage {
                msg_id,
                read_ct: 0,
                visible_at: Utc::now(),
                payload: payload.clone(),
            });
        Ok(msg_id)
    }

    async fn dequeue(
        &self,
        queue_name: &str,
        visibility_timeout_seconds: i32,
        batch_size: i32,
    ) -> MessagingResult<Vec<QueuedJob>> {
        let now = Utc::now();
        let hidden_until = now + Duration::seconds(i64::from(visibility_timeout_seconds));
        let limit = usize::try_from(batch_size).unwrap_or(0);

        let mut state = self.state.lock().await;
        let Some(messages) = state.queues.get_mut(queue_name) else {
            return Ok(Vec::new());
        };

        Ok(messages
            .iter_mut()
            .filter(|m| m.visible_at <= now)
            .take(limit)
            .map(|m| {
                m.read_ct += 1;
                m.visible_at = hidden_until;
                QueuedJob {
                    msg_id: m.msg_id,
                    read_ct: m.read_ct,
                    payload: m.payload.clone(),
                }
            })
            .collect())
    }

    async fn ack(&self, queue_name: &str, msg_id: i64) -> MessagingResult<()> {
        let mut state = self.state.lock().await;
        if let Some(messages) = state.queues.get_mut(queue_name) {
            messages.retain(|m| m.msg_id != msg_id);
        }
        Ok(())
    }
}

/// PGMQ-backed queue using the extension's SQL functions
#[derive(Debug, Clone)]
pub struct PgmqJobQueue {
    pool: PgPool,
}

impl PgmqJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create_queue(&self, queue_name: &str) -> MessagingResult<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue_name)
            .execute(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "create", e.to_string()))?;
        debug!(queue = queue_name, "Queue ensured");
        Ok(())
    }
}

#[async_trait]
impl JobQueue for PgmqJobQueue {
    async fn enqueue(&self, queue_name: &str, payload: &serde_json::Value) -> MessagingResult<i64> {
        let msg_id: i64 = sqlx::query_scalar("SELECT * FROM pgmq.send($1, $2)")
            .bind(queue_name)
            .bind(Json(payload))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "send", e.to_string()))?;

        debug!(queue = queue_name, msg_id = msg_id, "Job enqueued");
        Ok(msg_id)
    }

    async fn dequeue(
        &self,
        queue_name: &str,
        visibility_timeout_seconds: i32,
        batch_size: i32,
    ) -> MessagingResult<Vec<QueuedJob>> {
        let rows: Vec<(i64, i32, Json<serde_json::Value>)> =
            sqlx::query_as("SELECT msg_id, read_ct, message FROM pgmq.read($1, $2, $3)")
                .bind(queue_name)
                .bind(visibility_timeout_seconds)
                .bind(batch_size)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| MessagingError::queue_operation(queue_name, "read", e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(msg_id, read_ct, Json(payload))| QueuedJob {
                msg_id,
                read_ct,
                payload,
            })
            .collect())
    }

    async fn ack(&self, queue_name: &str, msg_id: i64) -> MessagingResult<()> {
        sqlx::query("SELECT pgmq.delete($1, $2)")
            .bind(queue_name)
            .bind(msg_id)
            .execute(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "delete", e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_dequeued_jobs_are_hidden_until_acked_or_expired() {
        let queue = InMemoryJobQueue::new();
        let id = queue.enqueue("jobs", &json!({"n": 1})).await.unwrap();

        let first = queue.dequeue("jobs", 30, 10).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].read_ct, 1);
        assert!(queue.dequeue("jobs", 30, 10).await.unwrap().is_empty());

        queue.ack("jobs", id).await.unwrap();
        assert!(queue.is_empty("jobs").await);
    }

    #[tokio::test]
    async fn test_unacked_job_is_redelivered_after_visibility_timeout() {
        let queue = InMemoryJobQueue::new();
        queue.enqueue("jobs", &json!({"n": 1})).await.unwrap();

        queue.dequeue("jobs", 0, 10).await.unwrap();
        let again = queue.dequeue("jobs", 0, 10).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].read_ct, 2);
    }

    #[tokio::test]
    async fn test_batch_size_limits_dequeue() {
        let queue = InMemoryJobQueue::new();
        for n in 0..5 {
            enqueue_json(&queue, "jobs", &json!({ "n": n })).await.unwrap();
        }
        assert_eq!(queue.dequeue("jobs", 30, 2).await.unwrap().len(), 2);
        assert_eq!(queue.len("jobs").await, 5);
    }
}
