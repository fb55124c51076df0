//! Error types for order pipeline operations.
//!
//! Each subsystem owns its error enum:
//! - Queue store access and admission ([`QueueError`])
//! - Order store access and validation ([`StoreError`])
//! - Worker pool lifecycle ([`PoolError`]) and single iterations ([`WorkerError`])
//! - Configuration ([`ConfigError`])
//!
//! [`PipelineError`] unifies them for callers of the service facade.

use thiserror::Error;

pub use crate::config::ConfigError;
pub use crate::scheduler::queue::QueueError;
pub use crate::scheduler::worker_pool::{PoolError, WorkerError};
pub use crate::storage::{MigrationError, StoreError};

/// Errors surfaced by the service facade and composition root.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Returns whether the error is a rejected order payload.
    pub fn is_validation(&self) -> bool {
        matches!(self, PipelineError::Store(e) if e.is_validation())
    }

    /// Returns whether the error is an unknown order id.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PipelineError::Store(StoreError::NotFound(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_classification() {
        let err: PipelineError = StoreError::Validation("amount mismatch".to_string()).into();
        assert!(err.is_validation());
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("amount mismatch"));

        let err: PipelineError = StoreError::NotFound("ORD-x".to_string()).into();
        assert!(err.is_not_found());
        assert!(!err.is_validation());

        let err: PipelineError = QueueError::Backend("down".to_string()).into();
        assert!(!err.is_validation());
        assert!(err.to_string().starts_with("Queue error"));
    }
}
