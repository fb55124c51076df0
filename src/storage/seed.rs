//! Sample users and items for local runs and load tests.
//!
//! Ids are fixed so that load generators can reference them without first
//! querying the store.

use serde::Serialize;
use tracing::info;

use super::orders::{Item, SqliteOrderStore, StoreError, User};

/// Users inserted by [`seed_sample_data`].
pub fn sample_users() -> Vec<User> {
    vec![
        User::new(
            "201a8e4a-c775-4266-a151-9db20b786f2d",
            "John Doe",
            "john@example.com",
        ),
        User::new(
            "2b035824-f340-44a0-bea3-16a61eb04358",
            "Jane Smith",
            "jane@example.com",
        ),
        User::new(
            "af798990-6dc6-47fd-b070-a8cacaba6d96",
            "Bob Wilson",
            "bob@example.com",
        ),
        User::new(
            "800a01c6-3809-4bec-a1e6-f703265f35f7",
            "Alice Brown",
            "alice@example.com",
        ),
        User::new(
            "6fdce818-259e-48b6-804a-c7acc4a46546",
            "Mike Johnson",
            "mike@example.com",
        ),
    ]
}

/// Items inserted by [`seed_sample_data`].
pub fn sample_items() -> Vec<Item> {
    vec![
        Item::new("22cb61f8-58fc-4a29-b6a1-65b469d58561", "Laptop", 999.99)
            .with_description("High performance laptop"),
        Item::new("4cee3042-5a7c-4f63-b06e-3c7f6c5c2f0f", "Smartphone", 699.99)
            .with_description("Latest model"),
        Item::new("95393f99-18f2-4363-872c-db5b7c8ec296", "Headphones", 199.99)
            .with_description("Wireless headphones"),
        Item::new("f0d909fc-8218-48b2-ae50-2b98eb3cd4e1", "Mouse", 49.99)
            .with_description("Gaming mouse"),
        Item::new("201a8e4a-c775-4266-a151-9db20b786f2d", "Keyboard", 89.99)
            .with_description("Mechanical keyboard"),
        Item::new("48e6c2c6-1fc4-49fa-8a69-e31c12285af0", "Monitor", 299.99)
            .with_description("27-inch 4K display"),
        Item::new("1f5a6b78-b5fe-4aa1-a198-c593fb3dea96", "Tablet", 399.99)
            .with_description("10-inch tablet"),
    ]
}

/// Counts of rows actually inserted by a seeding run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub users_created: usize,
    pub items_created: usize,
}

/// Inserts the sample users and items, skipping rows that already exist.
pub async fn seed_sample_data(store: &SqliteOrderStore) -> Result<SeedReport, StoreError> {
    let mut report = SeedReport::default();

    for user in sample_users() {
        if store.create_user(&user).await? {
            report.users_created += 1;
        }
    }

    for item in sample_items() {
        if store.create_item(&item).await? {
            report.items_created += 1;
        }
    }

    info!(
        users_created = report.users_created,
        items_created = report.items_created,
        "Sample data seeded"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("seed.db").display());
        let store = SqliteOrderStore::open(&url).await.unwrap();

        let first = seed_sample_data(&store).await.unwrap();
        assert_eq!(first.users_created, sample_users().len());
        assert_eq!(first.items_created, sample_items().len());

        let second = seed_sample_data(&store).await.unwrap();
        assert_eq!(second, SeedReport::default());

        let laptop = store
            .item_price("22cb61f8-58fc-4a29-b6a1-65b469d58561")
            .await
            .unwrap();
        assert_eq!(laptop, Some(999.99));
    }
}
