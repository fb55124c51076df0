//! order_pipeline: queue-driven order processing.
//!
//! Orders are created in a SQLite order store, admitted through a Redis
//! ingestion queue into a processing queue, and driven to completion in
//! batches by pools of independent worker tasks.

pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod scheduler;
pub mod service;
pub mod storage;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use error::{ConfigError, PipelineError, PoolError, QueueError, StoreError, WorkerError};
pub use service::{build_worker_manager, OrderService};
