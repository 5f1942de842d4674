//! Account repository
//!
//! Database operations for user accounts:
//! - `AccountRepository` trait defining the data-access interface
//! - `SqlxAccountRepository` implementing it for SQLite and MySQL
//!
//! Login and email matching is case-insensitive throughout; the lockout
//! counter is incremented with SQL-side arithmetic so concurrent failed
//! logins cannot lose updates.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::Account;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Account repository trait
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Insert a new account and return it with its id set
    async fn create(&self, account: &Account) -> Result<Account>;

    /// Get account by id
    async fn get_by_id(&self, id: i64) -> Result<Option<Account>>;

    /// Get account whose login or email equals `identity`, case-insensitive
    async fn get_by_identity(&self, identity: &str) -> Result<Option<Account>>;

    /// Get account by email, case-insensitive
    async fn get_by_email(&self, email: &str) -> Result<Option<Account>>;

    /// True if a login is already taken (case-insensitive)
    async fn login_exists(&self, login: &str) -> Result<bool>;

    /// True if an email is already registered (case-insensitive)
    async fn email_exists(&self, email: &str) -> Result<bool>;

    /// Atomically bump the unsuccessful-login counter and stamp the time
    async fn record_failed_login(&self, id: i64, at: DateTime<Utc>) -> Result<()>;

    /// Reset the unsuccessful-login counter to zero
    async fn clear_failed_logins(&self, id: i64) -> Result<()>;

    /// Bump the visit counter and stamp the last successful login
    async fn record_visit(&self, id: i64, at: DateTime<Utc>) -> Result<()>;

    /// Replace both verifier tokens and the salt
    async fn set_password(&self, id: i64, passwd1: &str, passwd2: &str, salt: &str) -> Result<()>;

    /// Update profile fields and credentials; does not touch the lockout
    /// counters or the visit counter
    async fn update_profile(&self, account: &Account) -> Result<()>;

    /// Mark the account deleted; it then behaves like an unknown account
    async fn soft_delete(&self, id: i64) -> Result<()>;
}

/// SQLx-based account repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxAccountRepository {
    pool: DynDatabasePool,
}

impl SqlxAccountRepository {
    /// Create a new SQLx account repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn AccountRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl AccountRepository for SqlxAccountRepository {
    async fn create(&self, account: &Account) -> Result<Account> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                create_account_sqlite(self.pool.as_sqlite().unwrap(), account).await
            }
            DatabaseDriver::Mysql => {
                create_account_mysql(self.pool.as_mysql().unwrap(), account).await
            }
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Account>> {
        let query = format!("{} WHERE id = ?", SELECT_ACCOUNT);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(&query)
                    .bind(id)
                    .fetch_optional(self.pool.as_sqlite().unwrap())
                    .await
                    .context("Failed to get account by id")?;
                row.as_ref().map(row_to_account_sqlite).transpose()
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(&query)
                    .bind(id)
                    .fetch_optional(self.pool.as_mysql().unwrap())
                    .await
                    .context("Failed to get account by id")?;
                row.as_ref().map(row_to_account_mysql).transpose()
            }
        }
    }

    async fn get_by_identity(&self, identity: &str) -> Result<Option<Account>> {
        let query = format!(
            "{} WHERE UPPER(login) = UPPER(?) OR (email <> '' AND UPPER(email) = UPPER(?))",
            SELECT_ACCOUNT
        );
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(&query)
                    .bind(identity)
                    .bind(identity)
                    .fetch_optional(self.pool.as_sqlite().unwrap())
                    .await
                    .context("Failed to get account by identity")?;
                row.as_ref().map(row_to_account_sqlite).transpose()
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(&query)
                    .bind(identity)
                    .bind(identity)
                    .fetch_optional(self.pool.as_mysql().unwrap())
                    .await
                    .context("Failed to get account by identity")?;
                row.as_ref().map(row_to_account_mysql).transpose()
            }
        }
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<Account>> {
        let query = format!(
            "{} WHERE email <> '' AND UPPER(email) = UPPER(?)",
            SELECT_ACCOUNT
        );
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(&query)
                    .bind(email)
                    .fetch_optional(self.pool.as_sqlite().unwrap())
                    .await
                    .context("Failed to get account by email")?;
                row.as_ref().map(row_to_account_sqlite).transpose()
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(&query)
                    .bind(email)
                    .fetch_optional(self.pool.as_mysql().unwrap())
                    .await
                    .context("Failed to get account by email")?;
                row.as_ref().map(row_to_account_mysql).transpose()
            }
        }
    }

    async fn login_exists(&self, login: &str) -> Result<bool> {
        count_matching(
            &self.pool,
            "SELECT COUNT(*) AS cnt FROM users WHERE UPPER(login) = UPPER(?)",
            login,
        )
        .await
        .map(|n| n > 0)
        .context("Failed to check login")
    }

    async fn email_exists(&self, email: &str) -> Result<bool> {
        count_matching(
            &self.pool,
            "SELECT COUNT(*) AS cnt FROM users WHERE email <> '' AND UPPER(email) = UPPER(?)",
            email,
        )
        .await
        .map(|n| n > 0)
        .context("Failed to check email")
    }

    async fn record_failed_login(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        // ula_cnt arithmetic stays in SQL so concurrent failures don't race
        let query = "UPDATE users SET ula_cnt = ula_cnt + 1, ula_time = ? WHERE id = ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(query)
                    .bind(at)
                    .bind(id)
                    .execute(self.pool.as_sqlite().unwrap())
                    .await
                    .context("Failed to record failed login")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(query)
                    .bind(at)
                    .bind(id)
                    .execute(self.pool.as_mysql().unwrap())
                    .await
                    .context("Failed to record failed login")?;
            }
        }
        Ok(())
    }

    async fn clear_failed_logins(&self, id: i64) -> Result<()> {
        let query = "UPDATE users SET ula_cnt = 0 WHERE id = ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(query)
                    .bind(id)
                    .execute(self.pool.as_sqlite().unwrap())
                    .await
                    .context("Failed to clear failed logins")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(query)
                    .bind(id)
                    .execute(self.pool.as_mysql().unwrap())
                    .await
                    .context("Failed to clear failed logins")?;
            }
        }
        Ok(())
    }

    async fn record_visit(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let query = "UPDATE users SET visits = visits + 1, last_login = ? WHERE id = ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(query)
                    .bind(at)
                    .bind(id)
                    .execute(self.pool.as_sqlite().unwrap())
                    .await
                    .context("Failed to record visit")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(query)
                    .bind(at)
                    .bind(id)
                    .execute(self.pool.as_mysql().unwrap())
                    .await
                    .context("Failed to record visit")?;
            }
        }
        Ok(())
    }

    async fn set_password(&self, id: i64, passwd1: &str, passwd2: &str, salt: &str) -> Result<()> {
        let query = "UPDATE users SET passwd1 = ?, passwd2 = ?, salt = ? WHERE id = ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(query)
                    .bind(passwd1)
                    .bind(passwd2)
                    .bind(salt)
                    .bind(id)
                    .execute(self.pool.as_sqlite().unwrap())
                    .await
                    .context("Failed to set password")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(query)
                    .bind(passwd1)
                    .bind(passwd2)
                    .bind(salt)
                    .bind(id)
                    .execute(self.pool.as_mysql().unwrap())
                    .await
                    .context("Failed to set password")?;
            }
        }
        Ok(())
    }

    async fn update_profile(&self, account: &Account) -> Result<()> {
        // Deliberately leaves ula_cnt/ula_time alone: lockout state survives
        // profile edits.
        let query = "UPDATE users SET login = ?, email = ?, name = ?, about = ?, \
                     passwd1 = ?, passwd2 = ?, salt = ? WHERE id = ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(query)
                    .bind(&account.login)
                    .bind(&account.email)
                    .bind(&account.name)
                    .bind(&account.about)
                    .bind(&account.passwd1)
                    .bind(&account.passwd2)
                    .bind(&account.salt)
                    .bind(account.id)
                    .execute(self.pool.as_sqlite().unwrap())
                    .await
                    .context("Failed to update profile")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(query)
                    .bind(&account.login)
                    .bind(&account.email)
                    .bind(&account.name)
                    .bind(&account.about)
                    .bind(&account.passwd1)
                    .bind(&account.passwd2)
                    .bind(&account.salt)
                    .bind(account.id)
                    .execute(self.pool.as_mysql().unwrap())
                    .await
                    .context("Failed to update profile")?;
            }
        }
        Ok(())
    }

    async fn soft_delete(&self, id: i64) -> Result<()> {
        let query = "UPDATE users SET deleted = 'Y' WHERE id = ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(query)
                    .bind(id)
                    .execute(self.pool.as_sqlite().unwrap())
                    .await
                    .context("Failed to soft-delete account")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(query)
                    .bind(id)
                    .execute(self.pool.as_mysql().unwrap())
                    .await
                    .context("Failed to soft-delete account")?;
            }
        }
        Ok(())
    }
}

const SELECT_ACCOUNT: &str = "SELECT id, login, email, name, about, passwd1, passwd2, salt, \
     ula_cnt, ula_time, visits, last_login, created_at, deleted FROM users";

async fn count_matching(pool: &DynDatabasePool, query: &str, value: &str) -> Result<i64> {
    match pool.driver() {
        DatabaseDriver::Sqlite => {
            let row = sqlx::query(query)
                .bind(value)
                .fetch_one(pool.as_sqlite().unwrap())
                .await?;
            Ok(row.get("cnt"))
        }
        DatabaseDriver::Mysql => {
            let row = sqlx::query(query)
                .bind(value)
                .fetch_one(pool.as_mysql().unwrap())
                .await?;
            Ok(row.get("cnt"))
        }
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_account_sqlite(pool: &SqlitePool, account: &Account) -> Result<Account> {
    let result = sqlx::query(
        r#"
        INSERT INTO users (login, email, name, about, passwd1, passwd2, salt,
                           ula_cnt, visits, created_at, deleted)
        VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, ?, 'N')
        "#,
    )
    .bind(&account.login)
    .bind(&account.email)
    .bind(&account.name)
    .bind(&account.about)
    .bind(&account.passwd1)
    .bind(&account.passwd2)
    .bind(&account.salt)
    .bind(account.created_at)
    .execute(pool)
    .await
    .context("Failed to create account")?;

    let mut created = account.clone();
    created.id = result.last_insert_rowid();
    Ok(created)
}

fn row_to_account_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Account> {
    let deleted: String = row.get("deleted");
    Ok(Account {
        id: row.get("id"),
        login: row.get("login"),
        email: row.get("email"),
        name: row.get("name"),
        about: row.get("about"),
        passwd1: row.get("passwd1"),
        passwd2: row.get("passwd2"),
        salt: row.get("salt"),
        ula_cnt: row.get("ula_cnt"),
        ula_time: row.get("ula_time"),
        visits: row.get("visits"),
        last_login: row.get("last_login"),
        created_at: row.get("created_at"),
        deleted: deleted == "Y",
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_account_mysql(pool: &MySqlPool, account: &Account) -> Result<Account> {
    let result = sqlx::query(
        r#"
        INSERT INTO users (login, email, name, about, passwd1, passwd2, salt,
                           ula_cnt, visits, created_at, deleted)
        VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, ?, 'N')
        "#,
    )
    .bind(&account.login)
    .bind(&account.email)
    .bind(&account.name)
    .bind(&account.about)
    .bind(&account.passwd1)
    .bind(&account.passwd2)
    .bind(&account.salt)
    .bind(account.created_at)
    .execute(pool)
    .await
    .context("Failed to create account")?;

    let mut created = account.clone();
    created.id = result.last_insert_id() as i64;
    Ok(created)
}

fn row_to_account_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Account> {
    let deleted: String = row.get("deleted");
    Ok(Account {
        id: row.get("id"),
        login: row.get("login"),
        email: row.get("email"),
        name: row.get("name"),
        about: row.get("about"),
        passwd1: row.get("passwd1"),
        passwd2: row.get("passwd2"),
        salt: row.get("salt"),
        ula_cnt: row.get("ula_cnt"),
        ula_time: row.get("ula_time"),
        visits: row.get("visits"),
        last_login: row.get("last_login"),
        created_at: row.get("created_at"),
        deleted: deleted == "Y",
    })
}
