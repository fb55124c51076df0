//! Redis-backed job queues for the order pipeline.
//!
//! # Queue Structure
//!
//! The pipeline uses two Redis lists and one counter:
//!
//! - `push_order_to_pipeline`: ingestion queue, one JSON [`OrderJob`] per new order
//! - `order_queue`: processing queue of bare order ids awaiting a batch
//! - `total_processed`: running total of orders that completed batch processing
//!
//! # Reliability
//!
//! Batches are leased with LRANGE + LTRIM issued as one MULTI/EXEC
//! transaction, so concurrent consumers never observe overlapping ids. Leased
//! ids are gone from the queue: a batch that fails afterwards is not returned.
//!
//! [`OrderJob`]: super::job::OrderJob

use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::retry::RetryPolicy;

/// Name of the queue new orders are pushed onto.
pub const INGESTION_QUEUE: &str = "push_order_to_pipeline";

/// Name of the queue batch workers lease from.
pub const PROCESSING_QUEUE: &str = "order_queue";

/// Name of the processed orders counter.
pub const PROCESSED_COUNTER: &str = "total_processed";

/// Number of processing queue entries included in a status report.
const STATUS_PEEK_LIMIT: isize = 10;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to connect to Redis.
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    RedisError(#[from] redis::RedisError),

    /// Failed to serialize or parse queue data.
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// An append could not be confirmed after exhausting the retry policy.
    #[error("Order {order_id} could not be admitted to '{queue}' after {attempts} attempts")]
    AdmissionFailure {
        order_id: String,
        queue: String,
        attempts: u32,
    },

    /// Backend-specific failure not covered above.
    #[error("Queue backend error: {0}")]
    Backend(String),
}

impl QueueError {
    /// Returns whether this error is an exhausted admission retry.
    pub fn is_admission_failure(&self) -> bool {
        matches!(self, QueueError::AdmissionFailure { .. })
    }
}

/// Primitive operations the queue store must provide.
///
/// Every method must be atomic with respect to concurrent callers; the
/// pipeline takes no client-side locks.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Removes and returns up to `max_size` entries from the head of `queue`
    /// in one indivisible step.
    async fn lease(&self, queue: &str, max_size: usize) -> Result<Vec<String>, QueueError>;

    /// Appends `value` to the tail of `queue`.
    async fn push(&self, queue: &str, value: &str) -> Result<(), QueueError>;

    /// Removes and returns the head of `queue`, if any.
    async fn pop(&self, queue: &str) -> Result<Option<String>, QueueError>;

    /// Returns the index of the first occurrence of `value` in `queue`.
    async fn position(&self, queue: &str, value: &str) -> Result<Option<usize>, QueueError>;

    /// Adds `amount` to the counter `key`, creating it at zero if absent.
    async fn incr_by(&self, key: &str, amount: u64) -> Result<u64, QueueError>;

    /// Returns the counter `key`, zero if absent.
    async fn counter(&self, key: &str) -> Result<u64, QueueError>;

    /// Returns the number of entries in `queue`.
    async fn len(&self, queue: &str) -> Result<usize, QueueError>;

    /// Returns entries `start..=end` of `queue` using Redis LRANGE index rules.
    async fn range(&self, queue: &str, start: isize, end: isize)
        -> Result<Vec<String>, QueueError>;

    /// Deletes the given keys.
    async fn delete(&self, keys: &[&str]) -> Result<(), QueueError>;
}

/// Redis implementation of [`QueueBackend`].
#[derive(Clone)]
pub struct RedisQueueBackend {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
}

impl RedisQueueBackend {
    /// Connects to Redis.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self { redis })
    }
}

#[async_trait]
impl QueueBackend for RedisQueueBackend {
    async fn lease(&self, queue: &str, max_size: usize) -> Result<Vec<String>, QueueError> {
        if max_size == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.redis.clone();

        // MULTI/EXEC so the read and the trim cannot interleave with another lease
        let mut pipe = redis::pipe();
        pipe.atomic()
            .lrange(queue, 0, max_size as isize - 1)
            .ltrim(queue, max_size as isize, -1)
            .ignore();
        let (ids,): (Vec<String>,) = pipe.query_async(&mut conn).await?;

        Ok(ids)
    }

    async fn push(&self, queue: &str, value: &str) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        conn.rpush::<_, _, ()>(queue, value).await?;
        Ok(())
    }

    async fn pop(&self, queue: &str) -> Result<Option<String>, QueueError> {
        let mut conn = self.redis.clone();
        let value: Option<String> = redis::cmd("LPOP")
            .arg(queue)
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn position(&self, queue: &str, value: &str) -> Result<Option<usize>, QueueError> {
        let mut conn = self.redis.clone();
        let position: Option<usize> = redis::cmd("LPOS")
            .arg(queue)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(position)
    }

    async fn incr_by(&self, key: &str, amount: u64) -> Result<u64, QueueError> {
        let mut conn = self.redis.clone();
        let value: u64 = conn.incr(key, amount).await?;
        Ok(value)
    }

    async fn counter(&self, key: &str) -> Result<u64, QueueError> {
        let mut conn = self.redis.clone();
        let value: Option<u64> = conn.get(key).await?;
        Ok(value.unwrap_or(0))
    }

    async fn len(&self, queue: &str) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(queue).await?;
        Ok(len)
    }

    async fn range(
        &self,
        queue: &str,
        start: isize,
        end: isize,
    ) -> Result<Vec<String>, QueueError> {
        let mut conn = self.redis.clone();
        let values: Vec<String> = conn.lrange(queue, start, end).await?;
        Ok(values)
    }

    async fn delete(&self, keys: &[&str]) -> Result<(), QueueError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(keys).await?;
        Ok(())
    }
}

/// Snapshot of the processing queue for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Number of ids waiting in the processing queue.
    pub queue_length: usize,
    /// First ids of the processing queue, head first.
    pub pending_orders: Vec<String>,
    /// Value of the processed orders counter.
    pub total_processed: u64,
}

/// Client for the shared queue store.
///
/// Constructed once by the composition root and shared by handle with every
/// worker and reporter.
#[derive(Clone)]
pub struct QueueClient {
    backend: Arc<dyn QueueBackend>,
    retry: RetryPolicy,
}

impl QueueClient {
    /// Creates a client over any backend with the default retry policy.
    pub fn new(backend: Arc<dyn QueueBackend>) -> Self {
        Self {
            backend,
            retry: RetryPolicy::default(),
        }
    }

    /// Connects to Redis and creates a client.
    pub async fn connect(redis_url: &str) -> Result<Self, QueueError> {
        let backend = RedisQueueBackend::connect(redis_url).await?;
        Ok(Self::new(Arc::new(backend)))
    }

    /// Sets the admission retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the admission retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Atomically removes and returns up to `max_size` ids from the head of
    /// `queue`. An empty queue yields an empty batch.
    pub async fn lease_batch(
        &self,
        queue: &str,
        max_size: usize,
    ) -> Result<Vec<String>, QueueError> {
        self.backend.lease(queue, max_size).await
    }

    /// Appends `id` to `queue` and confirms it by looking up its position.
    ///
    /// The append-then-confirm cycle is repeated while the retry policy
    /// allows it. Store errors are returned immediately; only a missing
    /// position is retried.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::AdmissionFailure` once every attempt failed to
    /// confirm.
    pub async fn append_with_confirmation(
        &self,
        queue: &str,
        id: &str,
    ) -> Result<usize, QueueError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            self.backend.push(queue, id).await?;

            if let Some(position) = self.backend.position(queue, id).await? {
                debug!(order_id = id, queue, position, attempts, "Append confirmed");
                return Ok(position);
            }

            if !self.retry.should_retry(attempts) {
                return Err(QueueError::AdmissionFailure {
                    order_id: id.to_string(),
                    queue: queue.to_string(),
                    attempts,
                });
            }

            warn!(
                order_id = id,
                queue,
                attempt = attempts,
                remaining_attempts = self.retry.remaining_attempts(attempts),
                "Append not confirmed, retrying"
            );

            if !self.retry.backoff().is_zero() {
                tokio::time::sleep(self.retry.backoff()).await;
            }
        }
    }

    /// Appends `value` to `queue` without confirmation.
    pub async fn enqueue(&self, queue: &str, value: &str) -> Result<(), QueueError> {
        self.backend.push(queue, value).await
    }

    /// Removes and returns the head of `queue` without blocking.
    pub async fn pop(&self, queue: &str) -> Result<Option<String>, QueueError> {
        self.backend.pop(queue).await
    }

    /// Atomically adds `amount` to the counter `name`.
    pub async fn increment_counter(&self, name: &str, amount: u64) -> Result<u64, QueueError> {
        self.backend.incr_by(name, amount).await
    }

    /// Returns the counter `name`, zero if it does not exist.
    pub async fn read_counter(&self, name: &str) -> Result<u64, QueueError> {
        self.backend.counter(name).await
    }

    /// Returns the number of entries in `queue`.
    pub async fn queue_length(&self, queue: &str) -> Result<usize, QueueError> {
        self.backend.len(queue).await
    }

    /// Returns entries `start..=end` of `queue` without removing them.
    /// Negative indices count from the tail.
    pub async fn peek(
        &self,
        queue: &str,
        start: isize,
        end: isize,
    ) -> Result<Vec<String>, QueueError> {
        self.backend.range(queue, start, end).await
    }

    /// Returns a status snapshot of the processing queue.
    pub async fn status(&self) -> Result<QueueStatus, QueueError> {
        let (queue_length, pending_orders, total_processed) = tokio::try_join!(
            self.queue_length(PROCESSING_QUEUE),
            self.peek(PROCESSING_QUEUE, 0, STATUS_PEEK_LIMIT - 1),
            self.read_counter(PROCESSED_COUNTER),
        )?;

        Ok(QueueStatus {
            queue_length,
            pending_orders,
            total_processed,
        })
    }

    /// Deletes both queues and the processed counter.
    ///
    /// **Warning**: This permanently drops every queued order id.
    pub async fn reset(&self) -> Result<(), QueueError> {
        self.backend
            .delete(&[INGESTION_QUEUE, PROCESSING_QUEUE, PROCESSED_COUNTER])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::memory::MemoryQueueBackend;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Backend whose confirmations fail a fixed number of times.
    struct UnconfirmedBackend {
        inner: MemoryQueueBackend,
        failures_left: AtomicU32,
        pushes: AtomicU32,
    }

    impl UnconfirmedBackend {
        fn new(failures: u32) -> Self {
            Self {
                inner: MemoryQueueBackend::new(),
                failures_left: AtomicU32::new(failures),
                pushes: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl QueueBackend for UnconfirmedBackend {
        async fn lease(&self, queue: &str, max_size: usize) -> Result<Vec<String>, QueueError> {
            self.inner.lease(queue, max_size).await
        }
        async fn push(&self, queue: &str, value: &str) -> Result<(), QueueError> {
            self.pushes.fetch_add(1, Ordering::SeqCst);
            self.inner.push(queue, value).await
        }
        async fn pop(&self, queue: &str) -> Result<Option<String>, QueueError> {
            self.inner.pop(queue).await
        }
        async fn position(&self, queue: &str, value: &str) -> Result<Option<usize>, QueueError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Ok(None);
            }
            self.inner.position(queue, value).await
        }
        async fn incr_by(&self, key: &str, amount: u64) -> Result<u64, QueueError> {
            self.inner.incr_by(key, amount).await
        }
        async fn counter(&self, key: &str) -> Result<u64, QueueError> {
            self.inner.counter(key).await
        }
        async fn len(&self, queue: &str) -> Result<usize, QueueError> {
            self.inner.len(queue).await
        }
        async fn range(
            &self,
            queue: &str,
            start: isize,
            end: isize,
        ) -> Result<Vec<String>, QueueError> {
            self.inner.range(queue, start, end).await
        }
        async fn delete(&self, keys: &[&str]) -> Result<(), QueueError> {
            self.inner.delete(keys).await
        }
    }

    fn memory_client() -> QueueClient {
        QueueClient::new(Arc::new(MemoryQueueBackend::new()))
    }

    #[test]
    fn test_queue_error_display() {
        let err = QueueError::ConnectionFailed("timeout".to_string());
        assert!(err.to_string().contains("timeout"));

        let err = QueueError::AdmissionFailure {
            order_id: "ORD-1".to_string(),
            queue: PROCESSING_QUEUE.to_string(),
            attempts: 3,
        };
        assert!(err.is_admission_failure());
        assert!(err.to_string().contains("ORD-1"));
        assert!(err.to_string().contains("3 attempts"));
    }

    #[tokio::test]
    async fn test_append_confirms_on_first_attempt() {
        let client = memory_client();
        client.enqueue(PROCESSING_QUEUE, "ORD-0").await.unwrap();

        let position = client
            .append_with_confirmation(PROCESSING_QUEUE, "ORD-1")
            .await
            .unwrap();

        assert_eq!(position, 1);
        assert_eq!(client.queue_length(PROCESSING_QUEUE).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_append_stops_retrying_once_confirmed() {
        let backend = Arc::new(UnconfirmedBackend::new(2));
        let client = QueueClient::new(backend.clone());

        let position = client
            .append_with_confirmation(PROCESSING_QUEUE, "ORD-1")
            .await
            .unwrap();

        // Third attempt confirms; each attempt re-appends.
        assert_eq!(backend.pushes.load(Ordering::SeqCst), 3);
        assert_eq!(position, 0);
    }

    #[tokio::test]
    async fn test_append_reports_admission_failure_after_three_attempts() {
        let backend = Arc::new(UnconfirmedBackend::new(u32::MAX));
        let client = QueueClient::new(backend.clone());

        let err = client
            .append_with_confirmation(PROCESSING_QUEUE, "ORD-1")
            .await
            .unwrap_err();

        match err {
            QueueError::AdmissionFailure {
                order_id, attempts, ..
            } => {
                assert_eq!(order_id, "ORD-1");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(backend.pushes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_append_honours_custom_policy() {
        let backend = Arc::new(UnconfirmedBackend::new(u32::MAX));
        let client = QueueClient::new(backend.clone()).with_retry_policy(RetryPolicy::new(5));

        let err = client
            .append_with_confirmation(PROCESSING_QUEUE, "ORD-1")
            .await
            .unwrap_err();
        assert!(err.is_admission_failure());
        assert_eq!(backend.pushes.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_lease_from_empty_queue_is_empty() {
        let client = memory_client();
        let batch = client.lease_batch(PROCESSING_QUEUE, 100).await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_lease_removes_exactly_leased_ids() {
        let client = memory_client();
        for i in 0..5 {
            client
                .enqueue(PROCESSING_QUEUE, &format!("ORD-{}", i))
                .await
                .unwrap();
        }

        let first = client.lease_batch(PROCESSING_QUEUE, 3).await.unwrap();
        assert_eq!(first, vec!["ORD-0", "ORD-1", "ORD-2"]);
        assert_eq!(
            client.peek(PROCESSING_QUEUE, 0, -1).await.unwrap(),
            vec!["ORD-3", "ORD-4"]
        );

        let rest = client.lease_batch(PROCESSING_QUEUE, 3).await.unwrap();
        assert_eq!(rest, vec!["ORD-3", "ORD-4"]);
        assert_eq!(client.queue_length(PROCESSING_QUEUE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_counter_starts_at_zero_and_accumulates() {
        let client = memory_client();
        assert_eq!(client.read_counter(PROCESSED_COUNTER).await.unwrap(), 0);

        client.increment_counter(PROCESSED_COUNTER, 3).await.unwrap();
        let total = client.increment_counter(PROCESSED_COUNTER, 4).await.unwrap();

        assert_eq!(total, 7);
        assert_eq!(client.read_counter(PROCESSED_COUNTER).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_status_reports_head_of_processing_queue() {
        let client = memory_client();
        for i in 0..12 {
            client
                .enqueue(PROCESSING_QUEUE, &format!("ORD-{}", i))
                .await
                .unwrap();
        }
        client.increment_counter(PROCESSED_COUNTER, 2).await.unwrap();

        let status = client.status().await.unwrap();
        assert_eq!(status.queue_length, 12);
        assert_eq!(status.pending_orders.len(), 10);
        assert_eq!(status.pending_orders[0], "ORD-0");
        assert_eq!(status.total_processed, 2);

        // Status reads never consume entries.
        assert_eq!(client.queue_length(PROCESSING_QUEUE).await.unwrap(), 12);
    }

    #[tokio::test]
    async fn test_reset_clears_queues_and_counter() {
        let client = memory_client();
        client.enqueue(INGESTION_QUEUE, "x").await.unwrap();
        client.enqueue(PROCESSING_QUEUE, "y").await.unwrap();
        client.increment_counter(PROCESSED_COUNTER, 1).await.unwrap();

        client.reset().await.unwrap();

        assert_eq!(client.queue_length(INGESTION_QUEUE).await.unwrap(), 0);
        assert_eq!(client.queue_length(PROCESSING_QUEUE).await.unwrap(), 0);
        assert_eq!(client.read_counter(PROCESSED_COUNTER).await.unwrap(), 0);
    }
}
