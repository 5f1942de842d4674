//! Contact message repository

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::ContactMessage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Contact message repository trait
#[async_trait]
pub trait ContactRepository: Send + Sync {
    /// Store a submitted contact message
    async fn insert(&self, message: &ContactMessage) -> Result<()>;
}

/// SQLx-based contact message repository implementation
pub struct SqlxContactRepository {
    pool: DynDatabasePool,
}

impl SqlxContactRepository {
    /// Create a new SQLx contact repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn ContactRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl ContactRepository for SqlxContactRepository {
    async fn insert(&self, message: &ContactMessage) -> Result<()> {
        let query =
            "INSERT INTO messages (user_id, email, message, created) VALUES (?, ?, ?, ?)";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(query)
                    .bind(message.user_id)
                    .bind(&message.email)
                    .bind(&message.message)
                    .bind(message.created)
                    .execute(self.pool.as_sqlite().unwrap())
                    .await
                    .context("Failed to insert contact message")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(query)
                    .bind(message.user_id)
                    .bind(&message.email)
                    .bind(&message.message)
                    .bind(message.created)
                    .execute(self.pool.as_mysql().unwrap())
                    .await
                    .context("Failed to insert contact message")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};
    use chrono::Utc;
    use sqlx::Row;

    #[tokio::test]
    async fn test_insert_stores_message() {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let repo = SqlxContactRepository::new(pool.clone());
        repo.insert(&ContactMessage {
            user_id: 0,
            email: "visitor@example.com".to_string(),
            message: "Hello there".to_string(),
            created: Utc::now(),
        })
        .await
        .unwrap();

        let row = sqlx::query("SELECT user_id, email, message FROM messages")
            .fetch_one(pool.as_sqlite().unwrap())
            .await
            .unwrap();
        assert_eq!(row.get::<i64, _>("user_id"), 0);
        assert_eq!(row.get::<String, _>("email"), "visitor@example.com");
        assert_eq!(row.get::<String, _>("message"), "Hello there");
    }
}
