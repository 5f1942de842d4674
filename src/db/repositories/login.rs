//! Persistent login repository
//!
//! Stores one row per remembered browser session. A row is keyed by the
//! (session id, user agent) pair so a stolen session id presented from a
//! different client does not resolve.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::LoginRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::sync::Arc;

/// Persistent login repository trait
#[async_trait]
pub trait LoginRepository: Send + Sync {
    /// Insert a login record
    async fn insert(&self, record: &LoginRecord) -> Result<()>;

    /// Look up a record by its session id and user agent
    async fn get_by_sesid_uagent(
        &self,
        sesid: &str,
        uagent: &str,
    ) -> Result<Option<LoginRecord>>;

    /// Stamp the last-used time of a record
    async fn touch_last_used(&self, sesid: &str, uagent: &str, at: DateTime<Utc>) -> Result<()>;

    /// Delete a single record
    async fn delete_by_sesid_uagent(&self, sesid: &str, uagent: &str) -> Result<()>;

    /// Delete every record belonging to a user, all devices at once
    async fn delete_by_user(&self, user_id: i64) -> Result<u64>;
}

/// SQLx-based login repository implementation
pub struct SqlxLoginRepository {
    pool: DynDatabasePool,
}

impl SqlxLoginRepository {
    /// Create a new SQLx login repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn LoginRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl LoginRepository for SqlxLoginRepository {
    async fn insert(&self, record: &LoginRecord) -> Result<()> {
        let query = "INSERT INTO logins (user_id, sesid, uagent, ip, created, last_used) \
                     VALUES (?, ?, ?, ?, ?, ?)";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(query)
                    .bind(record.user_id)
                    .bind(&record.sesid)
                    .bind(&record.uagent)
                    .bind(&record.ip)
                    .bind(record.created)
                    .bind(record.last_used)
                    .execute(self.pool.as_sqlite().unwrap())
                    .await
                    .context("Failed to insert login record")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(query)
                    .bind(record.user_id)
                    .bind(&record.sesid)
                    .bind(&record.uagent)
                    .bind(&record.ip)
                    .bind(record.created)
                    .bind(record.last_used)
                    .execute(self.pool.as_mysql().unwrap())
                    .await
                    .context("Failed to insert login record")?;
            }
        }
        Ok(())
    }

    async fn get_by_sesid_uagent(
        &self,
        sesid: &str,
        uagent: &str,
    ) -> Result<Option<LoginRecord>> {
        let query = "SELECT user_id, sesid, uagent, ip, created, last_used FROM logins \
                     WHERE sesid = ? AND uagent = ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(query)
                    .bind(sesid)
                    .bind(uagent)
                    .fetch_optional(self.pool.as_sqlite().unwrap())
                    .await
                    .context("Failed to get login record")?;
                Ok(row.map(|r| LoginRecord {
                    user_id: r.get("user_id"),
                    sesid: r.get("sesid"),
                    uagent: r.get("uagent"),
                    ip: r.get("ip"),
                    created: r.get("created"),
                    last_used: r.get("last_used"),
                }))
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(query)
                    .bind(sesid)
                    .bind(uagent)
                    .fetch_optional(self.pool.as_mysql().unwrap())
                    .await
                    .context("Failed to get login record")?;
                Ok(row.map(|r| LoginRecord {
                    user_id: r.get("user_id"),
                    sesid: r.get("sesid"),
                    uagent: r.get("uagent"),
                    ip: r.get("ip"),
                    created: r.get("created"),
                    last_used: r.get("last_used"),
                }))
            }
        }
    }

    async fn touch_last_used(&self, sesid: &str, uagent: &str, at: DateTime<Utc>) -> Result<()> {
        let query = "UPDATE logins SET last_used = ? WHERE sesid = ? AND uagent = ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(query)
                    .bind(at)
                    .bind(sesid)
                    .bind(uagent)
                    .execute(self.pool.as_sqlite().unwrap())
                    .await
                    .context("Failed to touch login record")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(query)
                    .bind(at)
                    .bind(sesid)
                    .bind(uagent)
                    .execute(self.pool.as_mysql().unwrap())
                    .await
                    .context("Failed to touch login record")?;
            }
        }
        Ok(())
    }

    async fn delete_by_sesid_uagent(&self, sesid: &str, uagent: &str) -> Result<()> {
        let query = "DELETE FROM logins WHERE sesid = ? AND uagent = ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(query)
                    .bind(sesid)
                    .bind(uagent)
                    .execute(self.pool.as_sqlite().unwrap())
                    .await
                    .context("Failed to delete login record")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(query)
                    .bind(sesid)
                    .bind(uagent)
                    .execute(self.pool.as_mysql().unwrap())
                    .await
                    .context("Failed to delete login record")?;
            }
        }
        Ok(())
    }

    async fn delete_by_user(&self, user_id: i64) -> Result<u64> {
        let query = "DELETE FROM logins WHERE user_id = ?";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(query)
                    .bind(user_id)
                    .execute(self.pool.as_sqlite().unwrap())
                    .await
                    .context("Failed to delete user login records")?
                    .rows_affected()
            }
            DatabaseDriver::Mysql => {
                sqlx::query(query)
                    .bind(user_id)
                    .execute(self.pool.as_mysql().unwrap())
                    .await
                    .context("Failed to delete user login records")?
                    .rows_affected()
            }
        };
        Ok(affected)
    }
}
