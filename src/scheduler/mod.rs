//! Queue-driven execution for the order pipeline.
//!
//! This module provides the moving parts between order creation and
//! completion:
//!
//! - **QueueClient**: shared queue store access (Redis lists plus a counter)
//! - **IngestionProcessor**: admits new orders into the processing queue
//! - **BatchProcessor**: leases batches and drives them to COMPLETED
//! - **WorkerPool / WorkerManager**: run processors on independent tasks
//!
//! # Architecture
//!
//! ```text
//!   OrderService::submit
//!          │
//!   ┌──────▼─────────────────┐     ingestion pool      ┌─────────────┐
//!   │ push_order_to_pipeline │ ──────────────────────▶ │ order_queue │
//!   └────────────────────────┘  pop + confirmed append └──────┬──────┘
//!                                                             │ atomic lease
//!                                                      processing pool
//!                                                             │
//!                                              PROCESSING ─▶ work ─▶ COMPLETED
//!                                                             │
//!                                                     total_processed += n
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use order_pipeline::scheduler::{
//!     BatchProcessor, IngestionProcessor, QueueClient, WorkerManager, WorkerPool,
//!     WorkerPoolConfig,
//! };
//!
//! let queue = Arc::new(QueueClient::connect("redis://localhost:6379").await?);
//!
//! let mut manager = WorkerManager::new();
//! manager.add_pool(WorkerPool::new(
//!     Arc::new(IngestionProcessor::new(queue.clone())),
//!     WorkerPoolConfig::new(2),
//! ));
//! manager.add_pool(WorkerPool::new(
//!     Arc::new(BatchProcessor::new(queue, store)),
//!     WorkerPoolConfig::new(4),
//! ));
//!
//! manager.start_all()?;
//! // ...
//! manager.stop_all().await;
//! ```

pub mod batch;
pub mod ingestion;
pub mod job;
pub mod memory;
pub mod queue;
pub mod retry;
pub mod worker_pool;

pub use batch::{BatchProcessor, BatchWork, SimulatedWork, PROCESSING_POOL};
pub use ingestion::{IngestionProcessor, INGESTION_POOL};
pub use job::{generate_order_id, OrderJob};
pub use memory::MemoryQueueBackend;
pub use queue::{
    QueueBackend, QueueClient, QueueError, QueueStatus, RedisQueueBackend, INGESTION_QUEUE,
    PROCESSED_COUNTER, PROCESSING_QUEUE,
};
pub use retry::RetryPolicy;
pub use worker_pool::{
    default_parallelism, PoolError, PoolState, PoolStats, StopReport, WorkOutcome, Worker,
    WorkerError, WorkerManager, WorkerPool, WorkerPoolConfig,
};
