//! Worker pools that drive the pipeline's polling loops.
//!
//! A [`WorkerPool`] runs a fixed number of execution units, each an
//! independent tokio task looping over one [`Worker`]. Units share nothing
//! in-process beyond their handle to the worker; all coordination happens
//! through the queue store and the order store.
//!
//! # Features
//!
//! - Pool lifecycle: Stopped → Starting → Running → Stopping → Stopped
//! - Cooperative shutdown via broadcast channel, checked once per iteration
//! - Per-unit stop timeout with forced termination as fallback
//! - Errors and panics inside an iteration are logged and never end the unit
//! - Pool statistics tracking

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::metrics::MetricsCollector;
use crate::storage::StoreError;

use super::queue::QueueError;

/// Default sleep between polls that found no work.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Default time a unit is given to exit after a stop signal.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors a single worker iteration can fail with.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Queue store operation failed (includes exhausted admission retries).
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Order store operation failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A queue entry could not be decoded.
    #[error("Malformed queue entry '{entry}': {reason}")]
    MalformedEntry { entry: String, reason: String },

    /// The unit of work itself failed.
    #[error("Work failed: {0}")]
    Work(String),
}

/// Result of one worker iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    /// Nothing was available; the unit backs off before polling again.
    Idle,
    /// The given number of jobs were handled.
    Processed(usize),
}

/// One stage of the pipeline, run repeatedly by every unit of a pool.
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    /// Name used for unit ids and logs.
    fn name(&self) -> &str;

    /// Attempts one unit of work.
    async fn poll_once(&self, unit_id: &str) -> Result<WorkOutcome, WorkerError>;
}

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Pool is already running.
    #[error("Pool '{0}' is already running")]
    AlreadyRunning(String),

    /// Pool is not running.
    #[error("Pool '{0}' is not running")]
    NotRunning(String),

    /// Pool configuration is invalid.
    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),
}

/// Lifecycle state of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolState::Stopped => write!(f, "stopped"),
            PoolState::Starting => write!(f, "starting"),
            PoolState::Running => write!(f, "running"),
            PoolState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Returns the default unit count: available parallelism minus one, at
/// least one.
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .saturating_sub(1)
        .max(1)
}

/// Configuration for a worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Number of execution units to spawn.
    pub num_units: usize,
    /// How long a unit sleeps after a poll that found no work.
    pub poll_interval: Duration,
    /// How long each unit is given to exit before it is aborted.
    pub stop_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_units: default_parallelism(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified number of units.
    pub fn new(num_units: usize) -> Self {
        Self {
            num_units,
            ..Default::default()
        }
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the stop timeout.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }
}

/// Statistics about a worker pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Configured number of units.
    pub num_units: usize,
    /// Units whose loop is currently running.
    pub live_units: usize,
    /// Jobs handled by iterations that succeeded.
    pub jobs_processed: u64,
    /// Polls that found no work.
    pub idle_polls: u64,
    /// Iterations that returned an error.
    pub failed_iterations: u64,
    /// Iterations that panicked.
    pub panicked_iterations: u64,
}

impl PoolStats {
    /// Returns the total number of failed iterations (errors + panics).
    pub fn total_failures(&self) -> u64 {
        self.failed_iterations + self.panicked_iterations
    }
}

/// Shared state for tracking pool statistics.
#[derive(Default)]
struct SharedPoolStats {
    jobs_processed: AtomicU64,
    idle_polls: AtomicU64,
    failed_iterations: AtomicU64,
    panicked_iterations: AtomicU64,
    live_units: AtomicU64,
}

impl SharedPoolStats {
    fn record_processed(&self, jobs: usize) {
        self.jobs_processed.fetch_add(jobs as u64, Ordering::SeqCst);
    }

    fn record_idle(&self) {
        self.idle_polls.fetch_add(1, Ordering::SeqCst);
    }

    fn record_failure(&self) {
        self.failed_iterations.fetch_add(1, Ordering::SeqCst);
    }

    fn record_panic(&self) {
        self.panicked_iterations.fetch_add(1, Ordering::SeqCst);
    }

    fn unit_started(&self) {
        self.live_units.fetch_add(1, Ordering::SeqCst);
    }

    fn unit_stopped(&self) {
        self.live_units.fetch_sub(1, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_units: usize) -> PoolStats {
        PoolStats {
            num_units,
            live_units: self.live_units.load(Ordering::SeqCst) as usize,
            jobs_processed: self.jobs_processed.load(Ordering::SeqCst),
            idle_polls: self.idle_polls.load(Ordering::SeqCst),
            failed_iterations: self.failed_iterations.load(Ordering::SeqCst),
            panicked_iterations: self.panicked_iterations.load(Ordering::SeqCst),
        }
    }
}

/// Outcome of stopping a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Units that exited on their own within the timeout.
    pub graceful: usize,
    /// Units that had to be aborted.
    pub forced: usize,
}

/// A fixed set of execution units running the same [`Worker`].
pub struct WorkerPool {
    worker: Arc<dyn Worker>,
    config: WorkerPoolConfig,
    shutdown_tx: broadcast::Sender<()>,
    units: Vec<JoinHandle<()>>,
    state: PoolState,
    stats: Arc<SharedPoolStats>,
}

impl WorkerPool {
    /// Creates a stopped pool for `worker`.
    pub fn new(worker: Arc<dyn Worker>, config: WorkerPoolConfig) -> Self {
        // Buffer size of 1 is sufficient since we only send once per stop
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            worker,
            config,
            shutdown_tx,
            units: Vec::new(),
            state: PoolState::Stopped,
            stats: Arc::new(SharedPoolStats::default()),
        }
    }

    /// Spawns `num_units` fresh execution units.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` unless the pool is stopped, and
    /// `PoolError::InvalidConfig` if the unit count is zero.
    pub fn start(&mut self) -> Result<(), PoolError> {
        if self.state != PoolState::Stopped {
            return Err(PoolError::AlreadyRunning(self.name().to_string()));
        }
        if self.config.num_units == 0 {
            return Err(PoolError::InvalidConfig(
                "num_units must be greater than 0".to_string(),
            ));
        }

        self.state = PoolState::Starting;

        for i in 0..self.config.num_units {
            let unit = Unit {
                id: format!("{}-{}", self.worker.name(), i),
                worker: Arc::clone(&self.worker),
                shutdown_rx: self.shutdown_tx.subscribe(),
                poll_interval: self.config.poll_interval,
                stats: Arc::clone(&self.stats),
            };
            self.units.push(tokio::spawn(unit.run()));
        }

        self.state = PoolState::Running;
        info!(
            pool = self.name(),
            num_units = self.config.num_units,
            "Worker pool started"
        );

        Ok(())
    }

    /// Signals every unit to stop and waits for them.
    ///
    /// Each unit gets up to `stop_timeout` to finish its current iteration;
    /// units still running after that are aborted. The unit list is cleared
    /// so a later [`start`](Self::start) spawns fresh units.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::NotRunning` if the pool is not running.
    pub async fn stop(&mut self) -> Result<StopReport, PoolError> {
        if self.state != PoolState::Running {
            return Err(PoolError::NotRunning(self.name().to_string()));
        }

        self.state = PoolState::Stopping;
        info!(pool = self.name(), "Stopping worker pool");

        // Ignore send error - units may have already stopped
        let _ = self.shutdown_tx.send(());

        let mut report = StopReport::default();
        for mut handle in self.units.drain(..) {
            match tokio::time::timeout(self.config.stop_timeout, &mut handle).await {
                Ok(Ok(())) => report.graceful += 1,
                Ok(Err(e)) => {
                    error!(pool = %self.worker.name(), error = %e, "Worker unit ended abnormally");
                    report.graceful += 1;
                }
                Err(_) => {
                    warn!(
                        pool = %self.worker.name(),
                        timeout_ms = self.config.stop_timeout.as_millis() as u64,
                        "Worker unit did not stop in time, aborting"
                    );
                    handle.abort();
                    // Wait for the cancelled task to be dropped so its live-unit guard runs
                    let _ = handle.await;
                    report.forced += 1;
                }
            }
        }

        self.state = PoolState::Stopped;
        info!(
            pool = self.name(),
            graceful = report.graceful,
            forced = report.forced,
            "Worker pool stopped"
        );

        Ok(report)
    }

    /// Returns the pool's name (the worker's name).
    pub fn name(&self) -> &str {
        self.worker.name()
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> PoolState {
        self.state
    }

    /// Returns whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.state == PoolState::Running
    }

    /// Returns the number of spawned units.
    pub fn num_units(&self) -> usize {
        self.units.len()
    }

    /// Returns the pool configuration.
    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.config.num_units)
    }
}

/// One execution unit: a polling loop over a worker.
struct Unit {
    id: String,
    worker: Arc<dyn Worker>,
    shutdown_rx: broadcast::Receiver<()>,
    poll_interval: Duration,
    stats: Arc<SharedPoolStats>,
}

/// Counts a unit as live until dropped, including when its task is aborted.
struct LiveUnitGuard {
    stats: Arc<SharedPoolStats>,
    pool: String,
}

impl LiveUnitGuard {
    fn new(stats: Arc<SharedPoolStats>, pool: &str) -> Self {
        stats.unit_started();
        MetricsCollector::new().unit_started(pool);
        Self {
            stats,
            pool: pool.to_string(),
        }
    }
}

impl Drop for LiveUnitGuard {
    fn drop(&mut self) {
        self.stats.unit_stopped();
        MetricsCollector::new().unit_stopped(&self.pool);
    }
}

impl Unit {
    async fn run(mut self) {
        info!(unit_id = %self.id, "Worker unit started");
        let _live = LiveUnitGuard::new(Arc::clone(&self.stats), self.worker.name());

        loop {
            // Check for shutdown signal (non-blocking)
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => break,
                Err(broadcast::error::TryRecvError::Lagged(_)) => break,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            let outcome = AssertUnwindSafe(self.worker.poll_once(&self.id))
                .catch_unwind()
                .await;

            let backoff = match outcome {
                Ok(Ok(WorkOutcome::Processed(jobs))) => {
                    self.stats.record_processed(jobs);
                    false
                }
                Ok(Ok(WorkOutcome::Idle)) => {
                    self.stats.record_idle();
                    true
                }
                Ok(Err(e)) => {
                    self.stats.record_failure();
                    error!(unit_id = %self.id, error = %e, "Worker iteration failed");
                    true
                }
                Err(panic) => {
                    self.stats.record_panic();
                    error!(
                        unit_id = %self.id,
                        panic = %panic_message(panic.as_ref()),
                        "Worker iteration panicked"
                    );
                    true
                }
            };

            if backoff {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    _ = self.shutdown_rx.recv() => break,
                }
            }
        }

        debug!(unit_id = %self.id, "Worker unit stopped");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Supervises the pipeline's pools.
///
/// Owned by the composition root; pools are started and stopped together.
#[derive(Default)]
pub struct WorkerManager {
    pools: Vec<WorkerPool>,
}

impl WorkerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pool to be managed.
    pub fn add_pool(&mut self, pool: WorkerPool) {
        self.pools.push(pool);
    }

    /// Starts every stopped pool.
    pub fn start_all(&mut self) -> Result<(), PoolError> {
        for pool in self.pools.iter_mut().filter(|p| !p.is_running()) {
            pool.start()?;
        }
        Ok(())
    }

    /// Stops every running pool, in the order they were added.
    pub async fn stop_all(&mut self) -> Vec<(String, StopReport)> {
        let mut reports = Vec::with_capacity(self.pools.len());
        for pool in self.pools.iter_mut().filter(|p| p.is_running()) {
            match pool.stop().await {
                Ok(report) => reports.push((pool.name().to_string(), report)),
                Err(e) => warn!(pool = pool.name(), error = %e, "Failed to stop pool"),
            }
        }
        reports
    }

    /// Returns the managed pools.
    pub fn pools(&self) -> &[WorkerPool] {
        &self.pools
    }

    /// Looks up a pool by name.
    pub fn pool(&self, name: &str) -> Option<&WorkerPool> {
        self.pools.iter().find(|p| p.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Worker that counts polls and can be told to fail or panic.
    struct ScriptedWorker {
        name: String,
        polls: AtomicUsize,
        behaviour: Behaviour,
    }

    enum Behaviour {
        Idle,
        FailEveryOther,
        PanicFirst,
        Hang,
    }

    impl ScriptedWorker {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                name: "scripted".to_string(),
                polls: AtomicUsize::new(0),
                behaviour,
            })
        }

        fn polls(&self) -> usize {
            self.polls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Worker for ScriptedWorker {
        fn name(&self) -> &str {
            &self.name
        }

        async fn poll_once(&self, _unit_id: &str) -> Result<WorkOutcome, WorkerError> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Idle => Ok(WorkOutcome::Idle),
                Behaviour::FailEveryOther if n % 2 == 0 => {
                    Err(WorkerError::Work("boom".to_string()))
                }
                Behaviour::FailEveryOther => Ok(WorkOutcome::Processed(1)),
                Behaviour::PanicFirst if n == 0 => panic!("first poll explodes"),
                Behaviour::PanicFirst => Ok(WorkOutcome::Processed(1)),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(WorkOutcome::Idle)
                }
            }
        }
    }

    fn fast_config(units: usize) -> WorkerPoolConfig {
        WorkerPoolConfig::new(units)
            .with_poll_interval(Duration::from_millis(5))
            .with_stop_timeout(Duration::from_millis(200))
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn test_worker_pool_config_default() {
        let config = WorkerPoolConfig::default();
        assert!(config.num_units >= 1);
        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.stop_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_default_parallelism_is_at_least_one() {
        assert!(default_parallelism() >= 1);
    }

    #[test]
    fn test_pool_error_display() {
        let err = PoolError::AlreadyRunning("ingestion".to_string());
        assert!(err.to_string().contains("already running"));

        let err = PoolError::NotRunning("processing".to_string());
        assert!(err.to_string().contains("not running"));
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(payload.as_ref()), "owned message");

        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let worker = ScriptedWorker::new(Behaviour::Idle);
        let mut pool = WorkerPool::new(worker.clone(), fast_config(3));
        assert_eq!(pool.state(), PoolState::Stopped);

        pool.start().unwrap();
        assert_eq!(pool.state(), PoolState::Running);
        assert_eq!(pool.num_units(), 3);
        assert!(matches!(pool.start(), Err(PoolError::AlreadyRunning(_))));

        wait_for(|| pool.stats().live_units == 3).await;
        wait_for(|| worker.polls() >= 3).await;

        let report = pool.stop().await.unwrap();
        assert_eq!(report, StopReport { graceful: 3, forced: 0 });
        assert_eq!(pool.state(), PoolState::Stopped);
        assert_eq!(pool.num_units(), 0);
        assert_eq!(pool.stats().live_units, 0);
        assert!(pool.stats().idle_polls >= 3);

        assert!(matches!(pool.stop().await, Err(PoolError::NotRunning(_))));
    }

    #[tokio::test]
    async fn test_restart_spawns_fresh_units() {
        let worker = ScriptedWorker::new(Behaviour::Idle);
        let mut pool = WorkerPool::new(worker.clone(), fast_config(2));

        pool.start().unwrap();
        pool.stop().await.unwrap();

        pool.start().unwrap();
        assert_eq!(pool.num_units(), 2);
        wait_for(|| pool.stats().live_units == 2).await;

        let before = worker.polls();
        wait_for(|| worker.polls() > before).await;
        pool.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_errors_do_not_end_the_unit() {
        let worker = ScriptedWorker::new(Behaviour::FailEveryOther);
        let mut pool = WorkerPool::new(worker.clone(), fast_config(1));

        pool.start().unwrap();
        wait_for(|| worker.polls() >= 6).await;
        let report = pool.stop().await.unwrap();

        assert_eq!(report.forced, 0);
        let stats = pool.stats();
        assert!(stats.failed_iterations >= 3);
        assert!(stats.jobs_processed >= 2);
    }

    #[tokio::test]
    async fn test_panics_do_not_end_the_unit() {
        let worker = ScriptedWorker::new(Behaviour::PanicFirst);
        let mut pool = WorkerPool::new(worker.clone(), fast_config(1));

        pool.start().unwrap();
        wait_for(|| worker.polls() >= 3).await;
        pool.stop().await.unwrap();

        let stats = pool.stats();
        assert_eq!(stats.panicked_iterations, 1);
        assert!(stats.jobs_processed >= 2);
        assert_eq!(stats.total_failures(), 1);
    }

    #[tokio::test]
    async fn test_stuck_unit_is_aborted_after_timeout() {
        let worker = ScriptedWorker::new(Behaviour::Hang);
        let mut pool = WorkerPool::new(worker.clone(), fast_config(2));

        pool.start().unwrap();
        wait_for(|| worker.polls() == 2).await;

        let report = pool.stop().await.unwrap();
        assert_eq!(report, StopReport { graceful: 0, forced: 2 });
        assert_eq!(pool.state(), PoolState::Stopped);
        assert_eq!(pool.stats().live_units, 0);

        pool.start().unwrap();
        wait_for(|| worker.polls() == 4).await;
        assert_eq!(pool.stats().live_units, 2);

        pool.stop().await.unwrap();
        assert_eq!(pool.stats().live_units, 0);
    }

    #[tokio::test]
    async fn test_zero_units_is_rejected() {
        let worker = ScriptedWorker::new(Behaviour::Idle);
        let mut pool = WorkerPool::new(worker, fast_config(0));
        assert!(matches!(pool.start(), Err(PoolError::InvalidConfig(_))));
        assert_eq!(pool.state(), PoolState::Stopped);
    }

    #[tokio::test]
    async fn test_manager_starts_and_stops_all_pools() {
        let mut manager = WorkerManager::new();
        manager.add_pool(WorkerPool::new(
            ScriptedWorker::new(Behaviour::Idle),
            fast_config(1),
        ));
        manager.add_pool(WorkerPool::new(
            ScriptedWorker::new(Behaviour::Idle),
            fast_config(2),
        ));

        manager.start_all().unwrap();
        assert!(manager.pools().iter().all(WorkerPool::is_running));
        assert!(manager.pool("scripted").is_some());

        let reports = manager.stop_all().await;
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[1].1.graceful, 2);
        assert!(manager.pools().iter().all(|p| !p.is_running()));
    }
}
