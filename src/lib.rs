//! Turnstile - user authentication and session lifecycle service
//!
//! Cookie-based sessions backed by a fixed-capacity in-memory table,
//! persistent "remember me" logins, brute-force lockout and email
//! password resets, on SQLite or MySQL.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod session;
