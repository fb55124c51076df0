//! Pipeline configuration.
//!
//! Values start from defaults, are overridden from environment variables by
//! [`PipelineConfig::from_env`], and may be overridden again by CLI flags
//! through the `with_*` builders.

use std::time::Duration;
use thiserror::Error;

use crate::scheduler::batch::{DEFAULT_BATCH_SIZE, DEFAULT_PROCESSING_DELAY, MAX_BATCH_SIZE};
use crate::scheduler::retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use crate::scheduler::worker_pool::{
    default_parallelism, WorkerPoolConfig, DEFAULT_POLL_INTERVAL, DEFAULT_STOP_TIMEOUT,
};

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the order pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    // Stores
    /// Redis URL of the queue store.
    pub redis_url: String,
    /// SQLite URL of the order store.
    pub database_url: String,

    // Batch processing
    /// Maximum number of ids leased per batch.
    pub batch_size: usize,
    /// Duration of the simulated per-batch work.
    pub processing_delay: Duration,

    // Worker pools
    /// Number of batch processing units.
    pub processing_workers: usize,
    /// Number of ingestion units.
    pub ingestion_workers: usize,
    /// Sleep after a poll that found no work.
    pub poll_interval: Duration,
    /// Time each unit gets to exit before it is aborted.
    pub stop_timeout: Duration,

    // Admission
    /// Total append attempts before an order is dropped.
    pub admission_attempts: u32,

    /// Delete both queues and the processed counter when serving starts.
    pub reset_on_start: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            database_url: "sqlite://orders.db".to_string(),

            batch_size: DEFAULT_BATCH_SIZE,
            processing_delay: DEFAULT_PROCESSING_DELAY,

            processing_workers: default_parallelism(),
            ingestion_workers: default_parallelism(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            stop_timeout: DEFAULT_STOP_TIMEOUT,

            admission_attempts: DEFAULT_MAX_ATTEMPTS,
            reset_on_start: false,
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `REDIS_URL`: queue store URL (default: redis://localhost:6379)
    /// - `DATABASE_URL`: order store URL (default: sqlite://orders.db)
    /// - `BATCH_SIZE`: ids per batch (default: 100)
    /// - `PROCESSING_WORKERS`: batch units (default: CPU count - 1, min 1)
    /// - `INGESTION_WORKERS`: ingestion units (default: CPU count - 1, min 1)
    /// - `POLL_INTERVAL_MS`: idle sleep in milliseconds (default: 10)
    /// - `WORKER_STOP_TIMEOUT_SECS`: per-unit stop timeout (default: 10)
    /// - `PROCESSING_DELAY_MS`: simulated batch work (default: 100)
    /// - `ADMISSION_MAX_ATTEMPTS`: admission attempts (default: 3)
    /// - `RESET_QUEUES_ON_START`: clear queues when serving (default: false)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the
    /// resulting configuration fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // Stores
        if let Some(val) = lookup("REDIS_URL") {
            config.redis_url = val;
        }

        if let Some(val) = lookup("DATABASE_URL") {
            config.database_url = val;
        }

        // Batch processing
        if let Some(val) = lookup("BATCH_SIZE") {
            config.batch_size = parse_env_value(&val, "BATCH_SIZE")?;
        }

        if let Some(val) = lookup("PROCESSING_DELAY_MS") {
            let ms: u64 = parse_env_value(&val, "PROCESSING_DELAY_MS")?;
            config.processing_delay = Duration::from_millis(ms);
        }

        // Worker pools
        if let Some(val) = lookup("PROCESSING_WORKERS") {
            config.processing_workers = parse_env_value(&val, "PROCESSING_WORKERS")?;
        }

        if let Some(val) = lookup("INGESTION_WORKERS") {
            config.ingestion_workers = parse_env_value(&val, "INGESTION_WORKERS")?;
        }

        if let Some(val) = lookup("POLL_INTERVAL_MS") {
            let ms: u64 = parse_env_value(&val, "POLL_INTERVAL_MS")?;
            config.poll_interval = Duration::from_millis(ms);
        }

        if let Some(val) = lookup("WORKER_STOP_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "WORKER_STOP_TIMEOUT_SECS")?;
            config.stop_timeout = Duration::from_secs(secs);
        }

        // Admission
        if let Some(val) = lookup("ADMISSION_MAX_ATTEMPTS") {
            config.admission_attempts = parse_env_value(&val, "ADMISSION_MAX_ATTEMPTS")?;
        }

        if let Some(val) = lookup("RESET_QUEUES_ON_START") {
            config.reset_on_start = parse_env_bool(&val, "RESET_QUEUES_ON_START")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "redis_url cannot be empty".to_string(),
            ));
        }

        if self.database_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "database_url cannot be empty".to_string(),
            ));
        }

        if self.batch_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "batch_size must be greater than 0".to_string(),
            ));
        }

        if self.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::ValidationFailed(format!(
                "batch_size must be at most {}",
                MAX_BATCH_SIZE
            )));
        }

        if self.processing_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "processing_workers must be greater than 0".to_string(),
            ));
        }

        if self.ingestion_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "ingestion_workers must be greater than 0".to_string(),
            ));
        }

        if self.admission_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "admission_attempts must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Pool configuration for the ingestion units.
    pub fn ingestion_pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new(self.ingestion_workers)
            .with_poll_interval(self.poll_interval)
            .with_stop_timeout(self.stop_timeout)
    }

    /// Pool configuration for the batch processing units.
    pub fn processing_pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new(self.processing_workers)
            .with_poll_interval(self.poll_interval)
            .with_stop_timeout(self.stop_timeout)
    }

    /// Admission retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.admission_attempts)
    }

    /// Builder method to set the Redis URL.
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    /// Builder method to set the database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    /// Builder method to set the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Builder method to set the simulated work duration.
    pub fn with_processing_delay(mut self, delay: Duration) -> Self {
        self.processing_delay = delay;
        self
    }

    /// Builder method to set the number of batch processing units.
    pub fn with_processing_workers(mut self, workers: usize) -> Self {
        self.processing_workers = workers;
        self
    }

    /// Builder method to set the number of ingestion units.
    pub fn with_ingestion_workers(mut self, workers: usize) -> Self {
        self.ingestion_workers = workers;
        self
    }

    /// Builder method to set the idle poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Builder method to set the per-unit stop timeout.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Builder method to set the admission attempts.
    pub fn with_admission_attempts(mut self, attempts: u32) -> Self {
        self.admission_attempts = attempts;
        self
    }

    /// Builder method to enable or disable resetting queues on start.
    pub fn with_reset_on_start(mut self, reset: bool) -> Self {
        self.reset_on_start = reset;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
