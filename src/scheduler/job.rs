//! Job definitions for the scheduler.
//!
//! Only order identifiers travel through the queues. The processing queue
//! holds bare ids; the ingestion queue holds a small JSON envelope so that
//! producers can be told apart from arbitrary list writes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix of every generated order id.
pub const ORDER_ID_PREFIX: &str = "ORD-";

/// Generates a fresh order id of the form `ORD-<32 hex chars>`.
pub fn generate_order_id() -> String {
    format!("{}{}", ORDER_ID_PREFIX, Uuid::new_v4().simple())
}

/// Message pushed onto the ingestion queue when an order is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderJob {
    /// Id of the order awaiting admission.
    pub order_id: String,
}

impl OrderJob {
    pub fn new(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
        }
    }

    /// Encodes the job as the JSON stored in the ingestion queue.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decodes a raw ingestion queue entry.
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
