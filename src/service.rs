//! Order submission and read-only reporting.
//!
//! [`OrderService`] is the pipeline's entry point: it creates orders in the
//! order store and hands their ids to the ingestion queue. Everything after
//! that happens asynchronously in the worker pools.

use std::sync::Arc;

use tracing::info;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::metrics::MetricsCollector;
use crate::scheduler::{
    generate_order_id, BatchProcessor, IngestionProcessor, OrderJob, QueueClient, QueueStatus,
    SimulatedWork, WorkerManager, WorkerPool, INGESTION_QUEUE,
};
use crate::storage::{NewOrder, Order, OrderMetrics, OrderStore};

/// Facade over the order store and queue client.
#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn OrderStore>,
    queue: Arc<QueueClient>,
}

impl OrderService {
    pub fn new(store: Arc<dyn OrderStore>, queue: Arc<QueueClient>) -> Self {
        Self { store, queue }
    }

    /// Creates an order and queues it for processing.
    ///
    /// The order is persisted as PENDING before exactly one ingestion message
    /// is pushed. A validation failure leaves both the store and the queues
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Store` with a validation error for bad
    /// payloads, or a queue error if the ingestion push fails. In the latter
    /// case the order exists but stays PENDING.
    pub async fn submit(&self, order: NewOrder) -> Result<Order, PipelineError> {
        let order_id = generate_order_id();
        let created = self.store.create_order(&order_id, &order).await?;

        let message = OrderJob::new(&created.order_id).encode()?;
        self.queue.enqueue(INGESTION_QUEUE, &message).await?;

        MetricsCollector::new().record_submitted();
        info!(
            order_id = %created.order_id,
            user_id = %created.user_id,
            items = created.item_ids.len(),
            total_amount = created.total_amount,
            "Order submitted"
        );

        Ok(created)
    }

    /// Looks up an order by id.
    pub async fn get_order(&self, order_id: &str) -> Result<Order, PipelineError> {
        Ok(self.store.get_order(order_id).await?)
    }

    /// Reports the processing queue and processed counter.
    pub async fn queue_status(&self) -> Result<QueueStatus, PipelineError> {
        Ok(self.queue.status().await?)
    }

    /// Reports aggregate order figures.
    pub async fn order_metrics(&self) -> Result<OrderMetrics, PipelineError> {
        Ok(self.store.order_metrics().await?)
    }
}

/// Builds the ingestion and processing pools described by `config`.
///
/// The pools are returned stopped.
pub fn build_worker_manager(
    config: &PipelineConfig,
    queue: Arc<QueueClient>,
    store: Arc<dyn OrderStore>,
) -> WorkerManager {
    let ingestion = IngestionProcessor::new(Arc::clone(&queue));
    let processing = BatchProcessor::new(queue, store)
        .with_batch_size(config.batch_size)
        .with_work(Arc::new(SimulatedWork::new(config.processing_delay)));

    let mut manager = WorkerManager::new();
    manager.add_pool(WorkerPool::new(
        Arc::new(ingestion),
        config.ingestion_pool_config(),
    ));
    manager.add_pool(WorkerPool::new(
        Arc::new(processing),
        config.processing_pool_config(),
    ));
    manager
}
