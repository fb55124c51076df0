//! SQLite-backed order store.
//!
//! Holds users, items and orders. The pipeline only ever touches orders
//! through the [`OrderStore`] trait: creation (with validation), lookup and
//! batched status updates.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use thiserror::Error;

use super::migrations::{MigrationError, MigrationRunner};

/// Errors that can occur during order store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The order payload was rejected before anything was written.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// No order exists with the given id.
    #[error("Order {0} not found")]
    NotFound(String),

    /// Connection to the database failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// A stored status value is not one of the known statuses.
    #[error("Unknown order status '{0}'")]
    InvalidStatus(String),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
}

impl StoreError {
    /// Returns whether this error is a payload validation failure.
    pub fn is_validation(&self) -> bool {
        matches!(self, StoreError::Validation(_))
    }
}

/// Lifecycle status of an order.
///
/// Statuses only move forward: pending, then processing, then completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
}

impl OrderStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [OrderStatus; 3] = [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::Completed,
    ];

    /// Returns the value stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
        }
    }

    /// Returns whether an order may move from `self` to `next`.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        next > self
    }

    /// Statuses from which an order may move to `self`.
    pub fn predecessors(self) -> Vec<OrderStatus> {
        Self::ALL
            .iter()
            .copied()
            .filter(|s| s.can_transition_to(self))
            .collect()
    }

    /// Returns whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "processing" => Ok(OrderStatus::Processing),
            "completed" => Ok(OrderStatus::Completed),
            other => Err(StoreError::InvalidStatus(other.to_string())),
        }
    }
}

/// A persisted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub user_id: String,
    /// Item ids in the order they were submitted.
    pub item_ids: Vec<String>,
    /// Sum of the item prices at the time the order was placed.
    pub total_amount: f64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set if and only if `status` is [`OrderStatus::Completed`].
    pub completed_at: Option<DateTime<Utc>>,
}

/// Payload for creating an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub user_id: String,
    pub item_ids: Vec<String>,
    /// Amount claimed by the client; must match the item prices.
    pub total_amount: f64,
}

impl NewOrder {
    pub fn new(
        user_id: impl Into<String>,
        item_ids: Vec<String>,
        total_amount: f64,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            item_ids,
            total_amount,
        }
    }
}

/// A user who can place orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub is_active: bool,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
            is_active: true,
        }
    }
}

/// A purchasable item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub is_active: bool,
}

impl Item {
    pub fn new(id: impl Into<String>, name: impl Into<String>, price: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            price,
            is_active: true,
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Aggregate figures over all orders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderMetrics {
    /// Mean of `completed_at - created_at` over completed orders, 0 if none.
    pub average_processing_time_seconds: f64,
    /// Order count per status; every status is present.
    pub order_status_counts: BTreeMap<String, u64>,
}

/// Persistent order store used by the pipeline.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Validates and persists a new order with status pending.
    ///
    /// Fails with [`StoreError::Validation`] if the user or any item is
    /// unknown, the item list is empty, or `total_amount` does not match the
    /// item prices (compared at one decimal place).
    async fn create_order(&self, order_id: &str, order: &NewOrder) -> Result<Order, StoreError>;

    /// Fetches an order, failing with [`StoreError::NotFound`] if absent.
    async fn get_order(&self, order_id: &str) -> Result<Order, StoreError>;

    /// Moves every listed order to `status` in one write.
    ///
    /// Unknown ids are ignored, as are orders whose current status does not
    /// precede `status`. Returns the number of orders changed.
    async fn bulk_update_status(
        &self,
        order_ids: &[String],
        status: OrderStatus,
    ) -> Result<u64, StoreError>;

    /// Computes aggregate order metrics.
    async fn order_metrics(&self) -> Result<OrderMetrics, StoreError>;
}

/// SQLite implementation of [`OrderStore`].
///
/// Connections come from a pool and are held only for the duration of a
/// single call.
#[derive(Clone)]
pub struct SqliteOrderStore {
    pool: SqlitePool,
}

impl SqliteOrderStore {
    /// Opens (creating if missing) the database at `database_url` and runs
    /// migrations.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite URL, e.g. `sqlite://orders.db`
    pub async fn open(database_url: &str) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(opts)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        tracing::info!(url = database_url, "Order store opened");
        Ok(store)
    }

    /// Runs database migrations.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        MigrationRunner::new(self.pool.clone())
            .run_migrations()
            .await?;
        Ok(())
    }

    /// Inserts a user. Returns `false` if a user with the same id or email
    /// already exists.
    pub async fn create_user(&self, user: &User) -> Result<bool, StoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT OR IGNORE INTO users (id, name, email, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.is_active)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Inserts an item. Returns `false` if an item with the same id exists.
    pub async fn create_item(&self, item: &Item) -> Result<bool, StoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT OR IGNORE INTO items (id, name, description, price, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        )
        .bind(&item.id)
        .bind(&item.name)
        .bind(&item.description)
        .bind(item.price)
        .bind(item.is_active)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Looks up an item's current price.
    pub async fn item_price(&self, item_id: &str) -> Result<Option<f64>, StoreError> {
        let row: Option<(f64,)> = sqlx::query_as("SELECT price FROM items WHERE id = ?1")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(price,)| price))
    }

    async fn item_ids_for(&self, order_id: &str) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT item_id FROM order_items WHERE order_id = ?1 ORDER BY id")
                .bind(order_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

#[async_trait]
impl OrderStore for SqliteOrderStore {
    async fn create_order(&self, order_id: &str, order: &NewOrder) -> Result<Order, StoreError> {
        if order.item_ids.is_empty() {
            return Err(StoreError::Validation(
                "order must contain at least one item".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        let user: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE id = ?1")
            .bind(&order.user_id)
            .fetch_optional(&mut *tx)
            .await?;
        if user.is_none() {
            return Err(StoreError::Validation(format!(
                "Invalid user ID: {}",
                order.user_id
            )));
        }

        let mut priced = Vec::with_capacity(order.item_ids.len());
        let mut expected_total = 0.0;
        for item_id in &order.item_ids {
            let price: Option<(f64,)> = sqlx::query_as("SELECT price FROM items WHERE id = ?1")
                .bind(item_id)
                .fetch_optional(&mut *tx)
                .await?;
            let Some((price,)) = price else {
                return Err(StoreError::Validation(format!(
                    "Invalid item ID: {}",
                    item_id
                )));
            };
            expected_total += price;
            priced.push((item_id, price));
        }

        if !amounts_match(order.total_amount, expected_total) {
            return Err(StoreError::Validation(format!(
                "Invalid total_amount: expected {:.2}, got {:.2}",
                expected_total, order.total_amount
            )));
        }

        let now = Utc::now();
        sqlx::query(
            "INSERT INTO orders (order_id, user_id, total_amount, status, created_at, updated_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, NULL)",
        )
        .bind(order_id)
        .bind(&order.user_id)
        .bind(expected_total)
        .bind(OrderStatus::Pending.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for (item_id, price) in &priced {
            sqlx::query(
                "INSERT INTO order_items (order_id, item_id, quantity, price_at_time)
                 VALUES (?1, ?2, 1, ?3)",
            )
            .bind(order_id)
            .bind(item_id.as_str())
            .bind(*price)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(Order {
            order_id: order_id.to_string(),
            user_id: order.user_id.clone(),
            item_ids: order.item_ids.clone(),
            total_amount: expected_total,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
    }

    async fn get_order(&self, order_id: &str) -> Result<Order, StoreError> {
        let row = sqlx::query(
            "SELECT order_id, user_id, total_amount, status, created_at, updated_at, completed_at
             FROM orders WHERE order_id = ?1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(order_id.to_string()))?;

        let item_ids = self.item_ids_for(order_id).await?;
        order_from_row(&row, item_ids)
    }

    async fn bulk_update_status(
        &self,
        order_ids: &[String],
        status: OrderStatus,
    ) -> Result<u64, StoreError> {
        let predecessors = status.predecessors();
        if order_ids.is_empty() || predecessors.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let completed_at = (status == OrderStatus::Completed).then_some(now);

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE orders SET status = ");
        qb.push_bind(status.as_str())
            .push(", updated_at = ")
            .push_bind(now)
            .push(", completed_at = ")
            .push_bind(completed_at)
            .push(" WHERE order_id IN (");
        {
            let mut ids = qb.separated(", ");
            for id in order_ids {
                ids.push_bind(id.as_str());
            }
        }
        qb.push(") AND status IN (");
        {
            let mut from = qb.separated(", ");
            for s in &predecessors {
                from.push_bind(s.as_str());
            }
        }
        qb.push(")");

        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn order_metrics(&self) -> Result<OrderMetrics, StoreError> {
        let (average,): (Option<f64>,) = sqlx::query_as(
            "SELECT AVG((julianday(completed_at) - julianday(created_at)) * 86400.0)
             FROM orders WHERE status = ?1 AND completed_at IS NOT NULL",
        )
        .bind(OrderStatus::Completed.as_str())
        .fetch_one(&self.pool)
        .await?;

        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM orders GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts: BTreeMap<String, u64> = OrderStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        for (status, count) in rows {
            counts.insert(status, count.max(0) as u64);
        }

        Ok(OrderMetrics {
            average_processing_time_seconds: average.unwrap_or(0.0),
            order_status_counts: counts,
        })
    }
}

fn order_from_row(row: &SqliteRow, item_ids: Vec<String>) -> Result<Order, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(Order {
        order_id: row.try_get("order_id")?,
        user_id: row.try_get("user_id")?,
        item_ids,
        total_amount: row.try_get("total_amount")?,
        status: status.parse()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

/// Compares two amounts rounded to one decimal place.
fn amounts_match(claimed: f64, computed: f64) -> bool {
    let round = |v: f64| (v * 10.0).round();
    round(claimed) == round(computed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_store() -> (SqliteOrderStore, TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("orders.db").display());
        let store = SqliteOrderStore::open(&url).await.expect("open store");

        store
            .create_user(&User::new("U1", "John Doe", "john@example.com"))
            .await
            .expect("user");
        store
            .create_item(&Item::new("I1", "Laptop", 999.99))
            .await
            .expect("item");
        store
            .create_item(&Item::new("I2", "Mouse", 49.99))
            .await
            .expect("item");

        (store, dir)
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_status_transitions_only_move_forward() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Processing));
        assert!(OrderStatus::Processing.can_transition_to(OrderStatus::Completed));
        assert!(!OrderStatus::Completed.can_transition_to(OrderStatus::Pending));
        assert!(!OrderStatus::Completed.can_transition_to(OrderStatus::Processing));
        assert!(!OrderStatus::Processing.can_transition_to(OrderStatus::Processing));
        assert!(OrderStatus::Completed.is_terminal());
        assert!(!OrderStatus::Processing.is_terminal());

        assert!(OrderStatus::Pending.predecessors().is_empty());
        assert_eq!(
            OrderStatus::Completed.predecessors(),
            vec![OrderStatus::Pending, OrderStatus::Processing]
        );
    }

    #[test]
    fn test_status_parse_and_display() {
        for status in OrderStatus::ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert_eq!("COMPLETED".parse::<OrderStatus>().unwrap(), OrderStatus::Completed);
        assert!("shipped".parse::<OrderStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&OrderStatus::Processing).unwrap(),
            "\"processing\""
        );
    }

    #[test]
    fn test_amounts_match_rounds_to_one_decimal() {
        assert!(amounts_match(1049.98, 1049.98));
        assert!(amounts_match(1050.0, 1049.98));
        assert!(!amounts_match(1049.0, 1049.98));
    }

    #[tokio::test]
    async fn test_create_and_get_order() {
        let (store, _dir) = open_store().await;

        let order = store
            .create_order("ORD-1", &NewOrder::new("U1", ids(&["I1", "I2"]), 1049.98))
            .await
            .expect("create order");

        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.completed_at.is_none());

        let fetched = store.get_order("ORD-1").await.expect("get order");
        assert_eq!(fetched.user_id, "U1");
        assert_eq!(fetched.item_ids, ids(&["I1", "I2"]));
        assert_eq!(fetched.status, OrderStatus::Pending);
        assert!((fetched.total_amount - 1049.98).abs() < 1e-9);
        assert!(fetched.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_create_order_validation_failures() {
        let (store, _dir) = open_store().await;

        let cases = vec![
            NewOrder::new("nobody", ids(&["I1"]), 999.99),
            NewOrder::new("U1", ids(&["I1", "missing"]), 999.99),
            NewOrder::new("U1", ids(&["I1", "I2"]), 10.0),
            NewOrder::new("U1", Vec::new(), 0.0),
        ];

        for (idx, payload) in cases.iter().enumerate() {
            let order_id = format!("ORD-bad-{}", idx);
            let err = store
                .create_order(&order_id, payload)
                .await
                .expect_err("payload should be rejected");
            assert!(err.is_validation(), "unexpected error: {}", err);

            // Nothing may be persisted for a rejected order.
            assert!(matches!(
                store.get_order(&order_id).await,
                Err(StoreError::NotFound(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_get_missing_order_is_not_found() {
        let (store, _dir) = open_store().await;
        let err = store.get_order("ORD-missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == "ORD-missing"));
    }

    #[tokio::test]
    async fn test_bulk_update_ignores_missing_ids() {
        let (store, _dir) = open_store().await;
        store
            .create_order("ORD-1", &NewOrder::new("U1", ids(&["I1"]), 999.99))
            .await
            .unwrap();
        store
            .create_order("ORD-2", &NewOrder::new("U1", ids(&["I2"]), 49.99))
            .await
            .unwrap();

        let changed = store
            .bulk_update_status(&ids(&["ORD-1", "ORD-ghost", "ORD-2"]), OrderStatus::Processing)
            .await
            .expect("bulk update");
        assert_eq!(changed, 2);

        for id in ["ORD-1", "ORD-2"] {
            let order = store.get_order(id).await.unwrap();
            assert_eq!(order.status, OrderStatus::Processing);
            assert!(order.completed_at.is_none());
        }

        assert_eq!(
            store
                .bulk_update_status(&[], OrderStatus::Completed)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_completed_sets_timestamp_and_never_regresses() {
        let (store, _dir) = open_store().await;
        store
            .create_order("ORD-1", &NewOrder::new("U1", ids(&["I1"]), 999.99))
            .await
            .unwrap();
        let batch = ids(&["ORD-1"]);

        store
            .bulk_update_status(&batch, OrderStatus::Processing)
            .await
            .unwrap();
        store
            .bulk_update_status(&batch, OrderStatus::Completed)
            .await
            .unwrap();

        let completed = store.get_order("ORD-1").await.unwrap();
        assert_eq!(completed.status, OrderStatus::Completed);
        let completed_at = completed.completed_at.expect("completed_at set");
        assert!(completed_at >= completed.created_at);

        // Late writes from a stale worker must not move the order backwards.
        assert_eq!(
            store
                .bulk_update_status(&batch, OrderStatus::Processing)
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            store
                .bulk_update_status(&batch, OrderStatus::Pending)
                .await
                .unwrap(),
            0
        );

        let after = store.get_order("ORD-1").await.unwrap();
        assert_eq!(after.status, OrderStatus::Completed);
        assert_eq!(after.completed_at, Some(completed_at));
    }

    #[tokio::test]
    async fn test_order_metrics_counts_every_status() {
        let (store, _dir) = open_store().await;

        let empty = store.order_metrics().await.unwrap();
        assert_eq!(empty.order_status_counts.len(), 3);
        assert!(empty.order_status_counts.values().all(|c| *c == 0));
        assert_eq!(empty.average_processing_time_seconds, 0.0);

        for id in ["ORD-1", "ORD-2", "ORD-3"] {
            store
                .create_order(id, &NewOrder::new("U1", ids(&["I2"]), 49.99))
                .await
                .unwrap();
        }
        store
            .bulk_update_status(&ids(&["ORD-1"]), OrderStatus::Completed)
            .await
            .unwrap();
        store
            .bulk_update_status(&ids(&["ORD-2"]), OrderStatus::Processing)
            .await
            .unwrap();

        let metrics = store.order_metrics().await.unwrap();
        assert_eq!(metrics.order_status_counts["pending"], 1);
        assert_eq!(metrics.order_status_counts["processing"], 1);
        assert_eq!(metrics.order_status_counts["completed"], 1);
        assert!(metrics.average_processing_time_seconds >= 0.0);
    }

    #[tokio::test]
    async fn test_seeding_is_idempotent() {
        let (store, _dir) = open_store().await;
        assert!(!store
            .create_user(&User::new("U1", "John Doe", "john@example.com"))
            .await
            .unwrap());
        assert!(!store
            .create_item(&Item::new("I1", "Laptop", 999.99))
            .await
            .unwrap());
        assert_eq!(store.item_price("I2").await.unwrap(), Some(49.99));
        assert_eq!(store.item_price("nope").await.unwrap(), None);
    }
}
