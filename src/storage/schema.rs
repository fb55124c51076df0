//! Database schema constants for the SQLite order store.
//!
//! Tables mirror the order domain: users place orders made of items, and each
//! order keeps the price of every item at the time it was placed.

/// SQL schema for creating the users table.
pub const CREATE_USERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id          TEXT    PRIMARY KEY,
    name        TEXT    NOT NULL,
    email       TEXT    NOT NULL UNIQUE,
    is_active   INTEGER NOT NULL DEFAULT 1,
    created_at  TEXT    NOT NULL,
    updated_at  TEXT    NOT NULL
)
"#;

/// SQL schema for creating the items table.
pub const CREATE_ITEMS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    id          TEXT    PRIMARY KEY,
    name        TEXT    NOT NULL,
    description TEXT,
    price       REAL    NOT NULL,
    is_active   INTEGER NOT NULL DEFAULT 1,
    created_at  TEXT    NOT NULL,
    updated_at  TEXT    NOT NULL
)
"#;

/// SQL schema for creating the orders table.
///
/// `completed_at` is only ever non-null for rows whose status is `completed`.
pub const CREATE_ORDERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS orders (
    order_id     TEXT    PRIMARY KEY,
    user_id      TEXT    NOT NULL REFERENCES users(id),
    total_amount REAL    NOT NULL,
    status       TEXT    NOT NULL DEFAULT 'pending',
    created_at   TEXT    NOT NULL,
    updated_at   TEXT    NOT NULL,
    completed_at TEXT
)
"#;

/// SQL schema for the order line items.
pub const CREATE_ORDER_ITEMS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS order_items (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    order_id      TEXT    NOT NULL REFERENCES orders(order_id) ON DELETE CASCADE,
    item_id       TEXT    NOT NULL REFERENCES items(id),
    quantity      INTEGER NOT NULL DEFAULT 1,
    price_at_time REAL    NOT NULL
)
"#;

/// Index definitions for query performance.
pub const CREATE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_orders_user_id ON orders(user_id);
CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);
CREATE INDEX IF NOT EXISTS idx_order_items_order_id ON order_items(order_id)
"#;

/// Returns all schema creation statements in dependency order.
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![
        CREATE_USERS_TABLE,
        CREATE_ITEMS_TABLE,
        CREATE_ORDERS_TABLE,
        CREATE_ORDER_ITEMS_TABLE,
        CREATE_INDEXES,
    ]
}
