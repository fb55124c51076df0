//! Database migration helpers.
//!
//! Applies the schema statements from [`super::schema`] once each and records
//! them in a `_migrations` table, so opening the store repeatedly is cheap.

use sqlx::SqlitePool;
use thiserror::Error;

use super::schema;

/// Errors that can occur during migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Database query failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration script failed to execute.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

/// Migration runner for applying schema changes.
pub struct MigrationRunner {
    pool: SqlitePool,
}

impl MigrationRunner {
    /// Creates a new migration runner.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Runs all pending migrations.
    ///
    /// Idempotent: statements already recorded in `_migrations` are skipped.
    pub async fn run_migrations(&self) -> Result<(), MigrationError> {
        self.ensure_migrations_table().await?;

        for (idx, statement) in schema::all_schema_statements().iter().enumerate() {
            let migration_name = format!("orders_v1_part_{}", idx);

            if !self.is_migration_applied(&migration_name).await? {
                self.apply_migration(&migration_name, statement).await?;
            }
        }

        Ok(())
    }

    async fn ensure_migrations_table(&self) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn is_migration_applied(&self, name: &str) -> Result<bool, MigrationError> {
        let result: Option<(i64,)> = sqlx::query_as("SELECT id FROM _migrations WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(result.is_some())
    }

    async fn apply_migration(&self, name: &str, statement: &str) -> Result<(), MigrationError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .map_err(|e| MigrationError::MigrationFailed(format!("{}: {}", name, e)))?;

        sqlx::query("INSERT INTO _migrations (name) VALUES (?1)")
            .bind(name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::debug!(migration = name, "Applied migration");
        Ok(())
    }

    /// Returns the names of all applied migrations, oldest first.
    pub async fn applied_migrations(&self) -> Result<Vec<String>, MigrationError> {
        self.ensure_migrations_table().await?;
        let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM _migrations ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }
}
