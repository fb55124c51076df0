//! Batch stage: leases order ids and drives them to COMPLETED.
//!
//! One poll is one batch:
//!
//! 1. lease up to `batch_size` ids from the processing queue
//! 2. mark them PROCESSING in one bulk update
//! 3. run the unit of work over the batch
//! 4. mark them COMPLETED in one bulk update
//! 5. add the batch length to the processed counter
//!
//! A failure anywhere after the lease abandons the batch. Its ids are not
//! returned to the queue and keep whatever status they last reached.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::metrics::MetricsCollector;
use crate::storage::{OrderStatus, OrderStore};

use super::queue::{QueueClient, PROCESSED_COUNTER, PROCESSING_QUEUE};
use super::worker_pool::{WorkOutcome, Worker, WorkerError};

/// Pool name used for batch units.
pub const PROCESSING_POOL: &str = "processing";

/// Default maximum number of ids leased per batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Largest accepted batch size. A bulk status update binds one SQL parameter
/// per id and SQLite caps bound parameters at 32766.
pub const MAX_BATCH_SIZE: usize = 10_000;

/// Default duration of the simulated unit of work.
pub const DEFAULT_PROCESSING_DELAY: Duration = Duration::from_millis(100);

/// The work performed on a leased batch between PROCESSING and COMPLETED.
#[async_trait]
pub trait BatchWork: Send + Sync + 'static {
    async fn process(&self, order_ids: &[String]) -> Result<(), WorkerError>;
}

/// Stand-in for real fulfilment work: waits a fixed delay per batch.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedWork {
    delay: Duration,
}

impl SimulatedWork {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for SimulatedWork {
    fn default() -> Self {
        Self::new(DEFAULT_PROCESSING_DELAY)
    }
}

#[async_trait]
impl BatchWork for SimulatedWork {
    async fn process(&self, _order_ids: &[String]) -> Result<(), WorkerError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(())
    }
}

/// Worker that processes batches from the processing queue.
pub struct BatchProcessor {
    queue: Arc<QueueClient>,
    store: Arc<dyn OrderStore>,
    work: Arc<dyn BatchWork>,
    batch_size: usize,
    metrics: MetricsCollector,
}

impl BatchProcessor {
    /// Creates a processor over [`PROCESSING_QUEUE`] with the default batch
    /// size and simulated work.
    pub fn new(queue: Arc<QueueClient>, store: Arc<dyn OrderStore>) -> Self {
        Self {
            queue,
            store,
            work: Arc::new(SimulatedWork::default()),
            batch_size: DEFAULT_BATCH_SIZE,
            metrics: MetricsCollector::new(),
        }
    }

    /// Sets the maximum number of ids per batch.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Replaces the unit of work.
    pub fn with_work(mut self, work: Arc<dyn BatchWork>) -> Self {
        self.work = work;
        self
    }

    /// Returns the maximum number of ids per batch.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn run_batch(&self, batch: &[String]) -> Result<(), WorkerError> {
        self.store
            .bulk_update_status(batch, OrderStatus::Processing)
            .await?;
        self.work.process(batch).await?;
        self.store
            .bulk_update_status(batch, OrderStatus::Completed)
            .await?;
        self.queue
            .increment_counter(PROCESSED_COUNTER, batch.len() as u64)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Worker for BatchProcessor {
    fn name(&self) -> &str {
        PROCESSING_POOL
    }

    async fn poll_once(&self, unit_id: &str) -> Result<WorkOutcome, WorkerError> {
        let batch = self
            .queue
            .lease_batch(PROCESSING_QUEUE, self.batch_size)
            .await?;
        if batch.is_empty() {
            return Ok(WorkOutcome::Idle);
        }

        let started = Instant::now();
        match self.run_batch(&batch).await {
            Ok(()) => {
                let elapsed = started.elapsed();
                self.metrics
                    .record_batch(true, batch.len(), elapsed.as_secs_f64());
                info!(
                    unit_id,
                    batch_size = batch.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Batch completed"
                );
                Ok(WorkOutcome::Processed(batch.len()))
            }
            Err(e) => {
                self.metrics
                    .record_batch(false, batch.len(), started.elapsed().as_secs_f64());
                warn!(
                    unit_id,
                    order_ids = ?batch,
                    error = %e,
                    "Abandoning batch; leased orders are not requeued"
                );
                Err(e)
            }
        }
    }
}
