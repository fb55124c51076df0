//! SQLite persistent storage for orders.
//!
//! # Overview
//!
//! The storage system consists of:
//! - **Orders**: the [`OrderStore`] trait the pipeline writes statuses through,
//!   and its SQLite implementation [`SqliteOrderStore`]
//! - **Schema**: table definitions for users, items, orders and line items
//! - **Migrations**: idempotent schema application
//! - **Seed**: fixed sample users and items for local runs
//!
//! # Usage
//!
//! ```rust,ignore
//! use order_pipeline::storage::{NewOrder, OrderStatus, OrderStore, SqliteOrderStore};
//!
//! let store = SqliteOrderStore::open("sqlite://orders.db").await?;
//!
//! let order = store
//!     .create_order("ORD-1", &NewOrder::new("U1", vec!["I1".into()], 999.99))
//!     .await?;
//!
//! store
//!     .bulk_update_status(&[order.order_id.clone()], OrderStatus::Processing)
//!     .await?;
//! ```

pub mod migrations;
pub mod orders;
pub mod schema;
pub mod seed;

// Re-export main types for convenience
pub use migrations::{MigrationError, MigrationRunner};
pub use orders::{
    Item, NewOrder, Order, OrderMetrics, OrderStatus, OrderStore, SqliteOrderStore, StoreError,
    User,
};
pub use seed::{sample_items, sample_users, seed_sample_data, SeedReport};
