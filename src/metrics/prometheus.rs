//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by the order pipeline and
//! provides functions for initializing, registering, and exporting them.

use prometheus::{
    Counter, CounterVec, Encoder, GaugeVec, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all pipeline metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total orders accepted by the submission path.
pub static ORDERS_SUBMITTED: OnceLock<Counter> = OnceLock::new();

/// Total orders moved from the ingestion queue into the processing queue.
pub static ORDERS_ADMITTED: OnceLock<Counter> = OnceLock::new();

/// Total orders dropped after exhausting admission retries.
pub static ADMISSION_FAILURES: OnceLock<Counter> = OnceLock::new();

/// Total ingestion queue entries dropped because they could not be decoded.
pub static MALFORMED_MESSAGES: OnceLock<Counter> = OnceLock::new();

/// Total batches handled, labeled by outcome (completed/failed).
pub static BATCHES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Total orders that reached COMPLETED through batch processing.
pub static ORDERS_COMPLETED: OnceLock<Counter> = OnceLock::new();

/// Batch processing duration in seconds, lease to completion.
pub static BATCH_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Number of entries in a queue, labeled by queue name.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Number of live execution units, labeled by pool.
pub static ACTIVE_UNITS: OnceLock<GaugeVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls build fresh collectors but leave the
/// already stored statics untouched.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    // Order flow
    let orders_submitted = Counter::new(
        "order_pipeline_orders_submitted_total",
        "Total orders accepted for processing",
    )?;

    let orders_admitted = Counter::new(
        "order_pipeline_orders_admitted_total",
        "Total orders admitted to the processing queue",
    )?;

    let admission_failures = Counter::new(
        "order_pipeline_admission_failures_total",
        "Total orders dropped after exhausting admission retries",
    )?;

    let malformed_messages = Counter::new(
        "order_pipeline_malformed_messages_total",
        "Total undecodable ingestion queue entries dropped",
    )?;

    let orders_completed = Counter::new(
        "order_pipeline_orders_completed_total",
        "Total orders completed by batch processing",
    )?;

    // Batch metrics
    let batches_total = CounterVec::new(
        Opts::new("order_pipeline_batches_total", "Total batches handled"),
        &["status"],
    )?;

    let batch_duration = Histogram::with_opts(
        HistogramOpts::new(
            "order_pipeline_batch_duration_seconds",
            "Batch processing duration in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
    )?;

    // Queue and worker metrics
    let queue_depth = GaugeVec::new(
        Opts::new("order_pipeline_queue_depth", "Number of entries in queue"),
        &["queue_name"],
    )?;

    let active_units = GaugeVec::new(
        Opts::new(
            "order_pipeline_active_units",
            "Number of live execution units",
        ),
        &["pool"],
    )?;

    registry.register(Box::new(orders_submitted.clone()))?;
    registry.register(Box::new(orders_admitted.clone()))?;
    registry.register(Box::new(admission_failures.clone()))?;
    registry.register(Box::new(malformed_messages.clone()))?;
    registry.register(Box::new(orders_completed.clone()))?;
    registry.register(Box::new(batches_total.clone()))?;
    registry.register(Box::new(batch_duration.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(active_units.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = ORDERS_SUBMITTED.set(orders_submitted);
    let _ = ORDERS_ADMITTED.set(orders_admitted);
    let _ = ADMISSION_FAILURES.set(admission_failures);
    let _ = MALFORMED_MESSAGES.set(malformed_messages);
    let _ = ORDERS_COMPLETED.set(orders_completed);
    let _ = BATCHES_TOTAL.set(batches_total);
    let _ = BATCH_DURATION.set(batch_duration);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = ACTIVE_UNITS.set(active_units);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// If the registry has not been initialized or encoding fails, the returned
/// string is a single comment line describing the problem.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        let result = init_metrics();
        assert!(result.is_ok() || REGISTRY.get().is_some());
    }

    #[test]
    fn test_export_metrics_after_init() {
        let _ = init_metrics();

        if let Some(counter) = ORDERS_SUBMITTED.get() {
            counter.inc();
        }

        let metrics = export_metrics();
        assert!(!metrics.starts_with("# Error"));
        assert!(metrics.contains("order_pipeline_orders_submitted_total"));
    }
}
