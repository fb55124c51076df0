//! Metrics module for Prometheus-based monitoring.
//!
//! Counts orders through each pipeline stage, times batches, and tracks
//! queue depth and live execution units.
//!
//! # Example
//!
//! ```ignore
//! use order_pipeline::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.update_queue_depth("order_queue", 12);
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    ACTIVE_UNITS, ADMISSION_FAILURES, BATCHES_TOTAL, BATCH_DURATION, MALFORMED_MESSAGES,
    ORDERS_ADMITTED, ORDERS_COMPLETED, ORDERS_SUBMITTED, QUEUE_DEPTH, REGISTRY,
};
