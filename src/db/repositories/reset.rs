//! Password-reset token repository
//!
//! One row per emailed reset link. Tokens are single-purpose random keys;
//! the linkkey column is the primary key, so a duplicate key insert fails
//! rather than silently replacing someone else's pending reset.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::ResetToken;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::sync::Arc;

/// Password-reset token repository trait
#[async_trait]
pub trait ResetTokenRepository: Send + Sync {
    /// Insert a reset token
    async fn insert(&self, token: &ResetToken) -> Result<()>;

    /// Look up a token by its link key
    async fn get_by_linkkey(&self, linkkey: &str) -> Result<Option<ResetToken>>;

    /// Delete a token once the reset completes
    async fn delete(&self, linkkey: &str) -> Result<()>;

    /// Delete tokens created before the cutoff, returning how many went
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// SQLx-based reset token repository implementation
pub struct SqlxResetTokenRepository {
    pool: DynDatabasePool,
}

impl SqlxResetTokenRepository {
    /// Create a new SQLx reset token repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn ResetTokenRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl ResetTokenRepository for SqlxResetTokenRepository {
    async fn insert(&self, token: &ResetToken) -> Result<()> {
        let query = "INSERT INTO password_resets (linkkey, user_id, created) VALUES (?, ?, ?)";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(query)
                    .bind(&token.linkkey)
                    .bind(token.user_id)
                    .bind(token.created)
                    .execute(self.pool.as_sqlite().unwrap())
                    .await
                    .context("Failed to insert reset token")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(query)
                    .bind(&token.linkkey)
                    .bind(token.user_id)
                    .bind(token.created)
                    .execute(self.pool.as_mysql().unwrap())
                    .await
                    .context("Failed to insert reset token")?;
            }
        }
        Ok(())
    }

    async fn get_by_linkkey(&self, linkkey: &str) -> Result<Option<ResetToken>> {
        let query = "SELECT linkkey, user_id, created FROM password_resets WHERE linkkey = ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(query)
                    .bind(linkkey)
                    .fetch_optional(self.pool.as_sqlite().unwrap())
                    .await
                    .context("Failed to get reset token")?;
                Ok(row.map(|r| ResetToken {
                    linkkey: r.get("linkkey"),
                    user_id: r.get("user_id"),
                    created: r.get("created"),
                }))
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(query)
                    .bind(linkkey)
                    .fetch_optional(self.pool.as_mysql().unwrap())
                    .await
                    .context("Failed to get reset token")?;
                Ok(row.map(|r| ResetToken {
                    linkkey: r.get("linkkey"),
                    user_id: r.get("user_id"),
                    created: r.get("created"),
                }))
            }
        }
    }

    async fn delete(&self, linkkey: &str) -> Result<()> {
        let query = "DELETE FROM password_resets WHERE linkkey = ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(query)
                    .bind(linkkey)
                    .execute(self.pool.as_sqlite().unwrap())
                    .await
                    .context("Failed to delete reset token")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(query)
                    .bind(linkkey)
                    .execute(self.pool.as_mysql().unwrap())
                    .await
                    .context("Failed to delete reset token")?;
            }
        }
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let query = "DELETE FROM password_resets WHERE created < ?";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(query)
                    .bind(cutoff)
                    .execute(self.pool.as_sqlite().unwrap())
                    .await
                    .context("Failed to purge reset tokens")?
                    .rows_affected()
            }
            DatabaseDriver::Mysql => {
                sqlx::query(query)
                    .bind(cutoff)
                    .execute(self.pool.as_mysql().unwrap())
                    .await
                    .context("Failed to purge reset tokens")?
                    .rows_affected()
            }
        };
        Ok(affected)
    }
}
