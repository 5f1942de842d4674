//! Configuration management
//!
//! Configuration is loaded from a `config.yml` file; missing values are
//! filled with sensible defaults so an empty or absent file still yields a
//! runnable service.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Authentication policy
    #[serde(default)]
    pub auth: AuthConfig,
    /// SMTP settings for outgoing mail
    #[serde(default)]
    pub smtp: SmtpConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public base URL, used when building password-reset links
    #[serde(default = "default_public_url")]
    pub public_url: String,
    /// Origin allowed to call the API with credentials
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: default_public_url(),
            cors_origin: default_cors_origin(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_cors_origin() -> String {
    "http://localhost:8080".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database driver (sqlite or mysql)
    #[serde(default)]
    pub driver: DatabaseDriver,
    /// Database connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "data/turnstile.db".to_string()
}

/// Database driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    /// SQLite (default)
    #[default]
    Sqlite,
    /// MySQL
    Mysql,
}

/// Authentication and session-lifecycle policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Maximum concurrent sessions held in memory
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Seconds of inactivity before a logged-in session is swept
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: i64,
    /// Days after which a persistent login record expires regardless of use
    #[serde(default = "default_login_max_age_days")]
    pub login_max_age_days: i64,
    /// Cookie lifetime in days when "remember me" is checked
    #[serde(default = "default_remember_days")]
    pub remember_days: i64,
    /// Hours a password-reset key stays valid
    #[serde(default = "default_reset_ttl_hours")]
    pub reset_ttl_hours: i64,
    /// Minimum login length
    #[serde(default = "default_min_login_len")]
    pub min_login_len: usize,
    /// Minimum password length
    #[serde(default = "default_min_password_len")]
    pub min_password_len: usize,
    /// Seconds between idle-session sweeps
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            idle_timeout_secs: default_idle_timeout_secs(),
            login_max_age_days: default_login_max_age_days(),
            remember_days: default_remember_days(),
            reset_ttl_hours: default_reset_ttl_hours(),
            min_login_len: default_min_login_len(),
            min_password_len: default_min_password_len(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_max_sessions() -> usize {
    1000
}

fn default_idle_timeout_secs() -> i64 {
    600
}

fn default_login_max_age_days() -> i64 {
    30
}

fn default_remember_days() -> i64 {
    30
}

fn default_reset_ttl_hours() -> i64 {
    24
}

fn default_min_login_len() -> usize {
    2
}

fn default_min_password_len() -> usize {
    6
}

fn default_sweep_interval_secs() -> u64 {
    60
}

/// SMTP settings for outgoing mail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// SMTP relay host; empty disables outgoing mail
    #[serde(default)]
    pub host: String,
    /// SMTP port
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// SMTP username
    #[serde(default)]
    pub username: String,
    /// SMTP password
    #[serde(default)]
    pub password: String,
    /// From address
    #[serde(default = "default_smtp_from")]
    pub from: String,
    /// Display name used in the From header
    #[serde(default = "default_smtp_from_name")]
    pub from_name: String,
    /// Address contact-form messages are forwarded to; empty disables the copy
    #[serde(default)]
    pub contact_email: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from: default_smtp_from(),
            from_name: default_smtp_from_name(),
            contact_email: String::new(),
        }
    }
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_from() -> String {
    "noreply@localhost".to_string()
}

fn default_smtp_from_name() -> String {
    "Turnstile".to_string()
}

impl Config {
    /// Load configuration from a YAML file.
    ///
    /// A missing or empty file yields the default configuration; an invalid
    /// file is an error with details.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path.display(), e))?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse {}: {}", path.display(), e))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.driver, DatabaseDriver::Sqlite);
        assert_eq!(config.auth.max_sessions, 1000);
        assert_eq!(config.auth.login_max_age_days, 30);
        assert_eq!(config.auth.reset_ttl_hours, 24);
        assert_eq!(config.auth.min_password_len, 6);
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let config = Config::load(Path::new("/nonexistent/config.yml")).expect("should not fail");
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
server:
  port: 9000
auth:
  max_sessions: 50
  idle_timeout_secs: 120
"#;
        let config: Config = serde_yaml::from_str(yaml).expect("valid yaml");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.auth.max_sessions, 50);
        assert_eq!(config.auth.idle_timeout_secs, 120);
        // untouched sections keep defaults
        assert_eq!(config.database.driver, DatabaseDriver::Sqlite);
        assert_eq!(config.smtp.port, 587);
    }

    #[test]
    fn test_parse_invalid_yaml_fails() {
        let yaml = "server: [not, a, map";
        let result: Result<Config, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err());
    }
}
