//! Database migrations
//!
//! Code-based migrations embedded as SQL strings, supporting both SQLite and
//! MySQL for single-binary deployment. Each migration carries a unique
//! version; applied versions are recorded in `_migrations`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};

use super::DynDatabasePool;
use crate::config::DatabaseDriver;

/// A database migration with SQL for both SQLite and MySQL
#[derive(Debug, Clone)]
pub struct Migration {
    /// Migration version number (must be unique and sequential)
    pub version: i32,
    /// Human-readable migration name
    pub name: &'static str,
    /// SQL statements for SQLite
    pub up_sqlite: &'static str,
    /// SQL statements for MySQL
    pub up_mysql: &'static str,
}

/// Migration record stored in the database
#[derive(Debug, Clone)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// All migrations, in order.
pub const MIGRATIONS: &[Migration] = &[
    // Migration 1: accounts, with credential tokens and lockout counters
    Migration {
        version: 1,
        name: "create_users",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                login VARCHAR(30) NOT NULL,
                email VARCHAR(120) NOT NULL DEFAULT '',
                name VARCHAR(120) NOT NULL DEFAULT '',
                about TEXT NOT NULL DEFAULT '',
                passwd1 VARCHAR(32) NOT NULL,
                passwd2 VARCHAR(32) NOT NULL,
                salt VARCHAR(16),
                ula_cnt INTEGER NOT NULL DEFAULT 0,
                ula_time TIMESTAMP,
                visits INTEGER NOT NULL DEFAULT 0,
                last_login TIMESTAMP,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                deleted CHAR(1) NOT NULL DEFAULT 'N'
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_users_login ON users(login COLLATE NOCASE);
            CREATE INDEX IF NOT EXISTS idx_users_email ON users(email COLLATE NOCASE);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS users (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                login VARCHAR(30) NOT NULL,
                email VARCHAR(120) NOT NULL DEFAULT '',
                name VARCHAR(120) NOT NULL DEFAULT '',
                about TEXT NOT NULL,
                passwd1 VARCHAR(32) NOT NULL,
                passwd2 VARCHAR(32) NOT NULL,
                salt VARCHAR(16),
                ula_cnt BIGINT NOT NULL DEFAULT 0,
                ula_time TIMESTAMP NULL,
                visits BIGINT NOT NULL DEFAULT 0,
                last_login TIMESTAMP NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                deleted CHAR(1) NOT NULL DEFAULT 'N'
            );
            CREATE UNIQUE INDEX idx_users_login ON users(login);
            CREATE INDEX idx_users_email ON users(email);
        "#,
    },
    // Migration 2: persistent login records, one per logged-in browser
    Migration {
        version: 2,
        name: "create_logins",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS logins (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                sesid VARCHAR(15) NOT NULL,
                uagent VARCHAR(250) NOT NULL,
                ip VARCHAR(45) NOT NULL DEFAULT '',
                created TIMESTAMP NOT NULL,
                last_used TIMESTAMP NOT NULL,
                UNIQUE (sesid, uagent),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_logins_user_id ON logins(user_id);
            CREATE INDEX IF NOT EXISTS idx_logins_sesid ON logins(sesid);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS logins (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                user_id BIGINT NOT NULL,
                sesid VARCHAR(15) NOT NULL,
                uagent VARCHAR(250) NOT NULL,
                ip VARCHAR(45) NOT NULL DEFAULT '',
                created TIMESTAMP NOT NULL,
                last_used TIMESTAMP NOT NULL,
                UNIQUE KEY uq_logins_sesid_uagent (sesid, uagent),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_logins_user_id ON logins(user_id);
            CREATE INDEX idx_logins_sesid ON logins(sesid);
        "#,
    },
    // Migration 3: password-reset keys
    Migration {
        version: 3,
        name: "create_password_resets",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS password_resets (
                linkkey VARCHAR(30) PRIMARY KEY,
                user_id INTEGER NOT NULL,
                created TIMESTAMP NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_password_resets_user_id ON password_resets(user_id);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS password_resets (
                linkkey VARCHAR(30) PRIMARY KEY,
                user_id BIGINT NOT NULL,
                created TIMESTAMP NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_password_resets_user_id ON password_resets(user_id);
        "#,
    },
    // Migration 4: per-user key-value settings
    Migration {
        version: 4,
        name: "create_user_settings",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS user_settings (
                user_id INTEGER NOT NULL,
                name VARCHAR(30) NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (user_id, name),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS user_settings (
                user_id BIGINT NOT NULL,
                name VARCHAR(30) NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (user_id, name),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
        "#,
    },
    // Migration 5: contact-form messages; user_id 0 means an anonymous sender
    Migration {
        version: 5,
        name: "create_messages",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL DEFAULT 0,
                email VARCHAR(120) NOT NULL DEFAULT '',
                message TEXT NOT NULL,
                created TIMESTAMP NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_user_id ON messages(user_id);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS messages (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                user_id BIGINT NOT NULL DEFAULT 0,
                email VARCHAR(120) NOT NULL DEFAULT '',
                message TEXT NOT NULL,
                created TIMESTAMP NOT NULL
            );
            CREATE INDEX idx_messages_user_id ON messages(user_id);
        "#,
    },
];

/// Run all pending migrations, returning how many were applied.
pub async fn run_migrations(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;

    let applied = get_applied_migrations(pool).await?;
    let applied_versions: Vec<i32> = applied.iter().map(|m| m.version as i32).collect();

    let mut count = 0;

    for migration in MIGRATIONS {
        if !applied_versions.contains(&migration.version) {
            tracing::info!(
                "Applying migration {}: {}",
                migration.version,
                migration.name
            );
            apply_migration(pool, migration)
                .await
                .with_context(|| format!("Failed to apply migration: {}", migration.name))?;
            count += 1;
        }
    }

    if count > 0 {
        tracing::info!("Applied {} migration(s)", count);
    } else {
        tracing::debug!("No pending migrations");
    }

    Ok(count)
}

async fn create_migrations_table(pool: &DynDatabasePool) -> Result<()> {
    let sql = match pool.driver() {
        DatabaseDriver::Sqlite => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        }
        DatabaseDriver::Mysql => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INT PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        }
    };

    pool.execute(sql).await?;
    Ok(())
}

/// Get list of already applied migrations
async fn get_applied_migrations(pool: &DynDatabasePool) -> Result<Vec<MigrationRecord>> {
    match pool.driver() {
        DatabaseDriver::Sqlite => get_applied_migrations_sqlite(pool.as_sqlite().unwrap()).await,
        DatabaseDriver::Mysql => get_applied_migrations_mysql(pool.as_mysql().unwrap()).await,
    }
}

async fn get_applied_migrations_sqlite(pool: &SqlitePool) -> Result<Vec<MigrationRecord>> {
    let rows = sqlx::query("SELECT version, name, applied_at FROM _migrations ORDER BY version")
        .fetch_all(pool)
        .await?;

    let mut records = Vec::new();
    for row in rows {
        records.push(MigrationRecord {
            version: row.get("version"),
            name: row.get("name"),
            applied_at: row.get("applied_at"),
        });
    }

    Ok(records)
}

async fn get_applied_migrations_mysql(pool: &MySqlPool) -> Result<Vec<MigrationRecord>> {
    let rows = sqlx::query("SELECT version, name, applied_at FROM _migrations ORDER BY version")
        .fetch_all(pool)
        .await?;

    let mut records = Vec::new();
    for row in rows {
        records.push(MigrationRecord {
            version: row.get("version"),
            name: row.get("name"),
            applied_at: row.get("applied_at"),
        });
    }

    Ok(records)
}

/// Apply a single migration
async fn apply_migration(pool: &DynDatabasePool, migration: &Migration) -> Result<()> {
    match pool.driver() {
        DatabaseDriver::Sqlite => {
            apply_migration_sqlite(pool.as_sqlite().unwrap(), migration).await
        }
        DatabaseDriver::Mysql => apply_migration_mysql(pool.as_mysql().unwrap(), migration).await,
    }
}

async fn apply_migration_sqlite(pool: &SqlitePool, migration: &Migration) -> Result<()> {
    for statement in split_sql_statements(migration.up_sqlite) {
        let statement = statement.trim();
        if !statement.is_empty() {
            sqlx::query(statement)
                .execute(pool)
                .await
                .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
        }
    }

    sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
        .bind(migration.version)
        .bind(migration.name)
        .execute(pool)
        .await?;

    Ok(())
}

async fn apply_migration_mysql(pool: &MySqlPool, migration: &Migration) -> Result<()> {
    for statement in split_sql_statements(migration.up_mysql) {
        let statement = statement.trim();
        if !statement.is_empty() {
            sqlx::query(statement)
                .execute(pool)
                .await
                .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
        }
    }

    sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
        .bind(migration.version)
        .bind(migration.name)
        .execute(pool)
        .await?;

    Ok(())
}

/// Split a migration blob into individual statements on semicolons.
fn split_sql_statements(sql: &str) -> Vec<&str> {
    sql.split(';').collect()
}

fn truncate_sql(sql: &str) -> String {
    let flat: String = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.len() > 80 {
        format!("{}...", &flat[..80])
    } else {
        flat
    }
}
