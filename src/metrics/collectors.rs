//! High-level recording interface over the raw Prometheus metrics.
//!
//! Every method is a no-op until [`init_metrics`](super::init_metrics) has
//! run, so library code can record unconditionally.

use super::prometheus::{
    ACTIVE_UNITS, ADMISSION_FAILURES, BATCHES_TOTAL, BATCH_DURATION, MALFORMED_MESSAGES,
    ORDERS_ADMITTED, ORDERS_COMPLETED, ORDERS_SUBMITTED, QUEUE_DEPTH,
};

/// Metrics collector for recording pipeline operational metrics.
///
/// # Example
///
/// ```ignore
/// use order_pipeline::metrics::{init_metrics, MetricsCollector};
///
/// init_metrics().expect("Failed to init metrics");
/// let collector = MetricsCollector::new();
///
/// collector.record_submitted();
/// collector.record_batch(true, 25, 0.12);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record an order accepted by the submission path.
    pub fn record_submitted(&self) {
        if let Some(counter) = ORDERS_SUBMITTED.get() {
            counter.inc();
        }
    }

    /// Record the outcome of one admission into the processing queue.
    pub fn record_admission(&self, admitted: bool) {
        let counter = if admitted {
            ORDERS_ADMITTED.get()
        } else {
            ADMISSION_FAILURES.get()
        };
        if let Some(counter) = counter {
            counter.inc();
        }

        tracing::trace!(admitted = admitted, "Recorded admission metric");
    }

    /// Record an ingestion entry dropped as undecodable.
    pub fn record_malformed(&self) {
        if let Some(counter) = MALFORMED_MESSAGES.get() {
            counter.inc();
        }
    }

    /// Record a finished batch.
    ///
    /// # Arguments
    ///
    /// * `completed` - Whether every order of the batch reached COMPLETED
    /// * `size` - Number of orders in the batch
    /// * `duration_secs` - Time from lease to the final status update
    pub fn record_batch(&self, completed: bool, size: usize, duration_secs: f64) {
        let status = if completed { "completed" } else { "failed" };

        if let Some(batches) = BATCHES_TOTAL.get() {
            batches.with_label_values(&[status]).inc();
        }

        if completed {
            if let Some(orders) = ORDERS_COMPLETED.get() {
                orders.inc_by(size as f64);
            }
            if let Some(duration) = BATCH_DURATION.get() {
                duration.observe(duration_secs);
            }
        }

        tracing::trace!(
            status = status,
            size = size,
            duration_secs = duration_secs,
            "Recorded batch metric"
        );
    }

    /// Update the depth gauge for a queue.
    pub fn update_queue_depth(&self, queue_name: &str, depth: usize) {
        if let Some(queue_depth) = QUEUE_DEPTH.get() {
            queue_depth
                .with_label_values(&[queue_name])
                .set(depth as f64);
        }

        tracing::trace!(
            queue_name = queue_name,
            depth = depth,
            "Updated queue depth metric"
        );
    }

    /// Mark one more unit of `pool` as live.
    pub fn unit_started(&self, pool: &str) {
        if let Some(units) = ACTIVE_UNITS.get() {
            units.with_label_values(&[pool]).inc();
        }
    }

    /// Mark one unit of `pool` as exited.
    pub fn unit_stopped(&self, pool: &str) {
        if let Some(units) = ACTIVE_UNITS.get() {
            units.with_label_values(&[pool]).dec();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::init_metrics;

    fn ensure_metrics_init() {
        let _ = init_metrics();
    }

    #[test]
    fn test_metrics_collector_is_zero_sized() {
        let collector = MetricsCollector::new();
        assert!(std::mem::size_of_val(&collector) == 0);
    }

    #[test]
    fn test_record_admission_counts_by_outcome() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        let admitted_before = ORDERS_ADMITTED.get().map_or(0.0, |c| c.get());
        let failed_before = ADMISSION_FAILURES.get().map_or(0.0, |c| c.get());

        collector.record_admission(true);
        collector.record_admission(true);
        collector.record_admission(false);

        assert!(ORDERS_ADMITTED.get().map_or(0.0, |c| c.get()) >= admitted_before + 2.0);
        assert!(ADMISSION_FAILURES.get().map_or(0.0, |c| c.get()) >= failed_before + 1.0);
    }

    #[test]
    fn test_record_batch() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.record_batch(true, 100, 0.2);
        collector.record_batch(false, 3, 0.01);

        let failed = BATCHES_TOTAL
            .get()
            .map_or(0.0, |c| c.with_label_values(&["failed"]).get());
        assert!(failed >= 1.0);
    }

    #[test]
    fn test_update_queue_depth() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.update_queue_depth("collector_test_queue", 42);
        let depth = QUEUE_DEPTH
            .get()
            .map_or(0.0, |g| g.with_label_values(&["collector_test_queue"]).get());
        assert_eq!(depth, 42.0);
    }

    #[test]
    fn test_unit_gauge_moves_both_ways() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.unit_started("collector_test_pool");
        collector.unit_started("collector_test_pool");
        collector.unit_stopped("collector_test_pool");

        let live = ACTIVE_UNITS
            .get()
            .map_or(0.0, |g| g.with_label_values(&["collector_test_pool"]).get());
        assert_eq!(live, 1.0);
    }
}
