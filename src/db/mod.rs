//! Database layer
//!
//! Persistence for accounts, login records and password-reset keys.
//! Supports SQLite (default, single-binary deployment) and MySQL behind a
//! trait-based pool abstraction; the driver is selected by configuration.

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{
    create_pool, create_test_pool, DatabasePool, DynDatabasePool, MysqlDatabase, SqliteDatabase,
};
