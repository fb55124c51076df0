//! Ingestion stage: moves newly created orders into the processing queue.
//!
//! Each poll pops at most one entry from the ingestion queue, decodes it and
//! admits the order id into the processing queue through
//! [`QueueClient::append_with_confirmation`]. Entries that cannot be decoded
//! and orders whose admission is never confirmed are logged and dropped.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::metrics::MetricsCollector;

use super::job::OrderJob;
use super::queue::{QueueClient, INGESTION_QUEUE, PROCESSING_QUEUE};
use super::worker_pool::{WorkOutcome, Worker, WorkerError};

/// Pool name used for ingestion units.
pub const INGESTION_POOL: &str = "ingestion";

/// Worker that forwards order ids from the ingestion queue to the
/// processing queue.
pub struct IngestionProcessor {
    queue: Arc<QueueClient>,
    source: String,
    target: String,
    metrics: MetricsCollector,
}

impl IngestionProcessor {
    /// Creates a processor reading [`INGESTION_QUEUE`] and writing
    /// [`PROCESSING_QUEUE`].
    pub fn new(queue: Arc<QueueClient>) -> Self {
        Self {
            queue,
            source: INGESTION_QUEUE.to_string(),
            target: PROCESSING_QUEUE.to_string(),
            metrics: MetricsCollector::new(),
        }
    }

    /// Overrides the queues this processor reads from and writes to.
    pub fn with_queues(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.source = source.into();
        self.target = target.into();
        self
    }

    /// Returns the queue this processor reads from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns the queue this processor admits orders into.
    pub fn target(&self) -> &str {
        &self.target
    }
}

#[async_trait]
impl Worker for IngestionProcessor {
    fn name(&self) -> &str {
        INGESTION_POOL
    }

    async fn poll_once(&self, unit_id: &str) -> Result<WorkOutcome, WorkerError> {
        let Some(raw) = self.queue.pop(&self.source).await? else {
            return Ok(WorkOutcome::Idle);
        };

        let job = match OrderJob::decode(&raw) {
            Ok(job) => job,
            Err(e) => {
                self.metrics.record_malformed();
                return Err(WorkerError::MalformedEntry {
                    entry: raw,
                    reason: e.to_string(),
                });
            }
        };

        match self
            .queue
            .append_with_confirmation(&self.target, &job.order_id)
            .await
        {
            Ok(position) => {
                self.metrics.record_admission(true);
                debug!(
                    unit_id,
                    order_id = %job.order_id,
                    position,
                    "Order admitted to processing queue"
                );
                Ok(WorkOutcome::Processed(1))
            }
            Err(e) if e.is_admission_failure() => {
                self.metrics.record_admission(false);
                error!(
                    unit_id,
                    order_id = %job.order_id,
                    error = %e,
                    "Dropping order after failed admission"
                );
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }
}
