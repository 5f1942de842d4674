//! Per-user settings repository
//!
//! A small key-value store scoped to a user. Writes are upserts; a key is
//! unique per user, so setting it again replaces the value.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;
use std::sync::Arc;

/// Per-user settings repository trait
#[async_trait]
pub trait UserSettingsRepository: Send + Sync {
    /// Insert or replace a setting
    async fn set(&self, user_id: i64, name: &str, value: &str) -> Result<()>;

    /// Read a setting, `None` when never set
    async fn get(&self, user_id: i64, name: &str) -> Result<Option<String>>;
}

/// SQLx-based settings repository implementation
pub struct SqlxUserSettingsRepository {
    pool: DynDatabasePool,
}

impl SqlxUserSettingsRepository {
    /// Create a new SQLx settings repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UserSettingsRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl UserSettingsRepository for SqlxUserSettingsRepository {
    async fn set(&self, user_id: i64, name: &str, value: &str) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(
                    "INSERT INTO user_settings (user_id, name, value) VALUES (?, ?, ?) \
                     ON CONFLICT(user_id, name) DO UPDATE SET value = excluded.value",
                )
                .bind(user_id)
                .bind(name)
                .bind(value)
                .execute(self.pool.as_sqlite().unwrap())
                .await
                .context("Failed to set user setting")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(
                    "INSERT INTO user_settings (user_id, name, value) VALUES (?, ?, ?) \
                     ON DUPLICATE KEY UPDATE value = VALUES(value)",
                )
                .bind(user_id)
                .bind(name)
                .bind(value)
                .execute(self.pool.as_mysql().unwrap())
                .await
                .context("Failed to set user setting")?;
            }
        }
        Ok(())
    }

    async fn get(&self, user_id: i64, name: &str) -> Result<Option<String>> {
        let query = "SELECT value FROM user_settings WHERE user_id = ? AND name = ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(query)
                    .bind(user_id)
                    .bind(name)
                    .fetch_optional(self.pool.as_sqlite().unwrap())
                    .await
                    .context("Failed to get user setting")?;
                Ok(row.map(|r| r.get("value")))
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(query)
                    .bind(user_id)
                    .bind(name)
                    .fetch_optional(self.pool.as_mysql().unwrap())
                    .await
                    .context("Failed to get user setting")?;
                Ok(row.map(|r| r.get("value")))
            }
        }
    }
}
