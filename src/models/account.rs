//! Account model
//!
//! A registered user account. Credentials are stored as two independent
//! verifier tokens so that changing the login does not invalidate the
//! email-derived token and vice versa.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user account as stored in the `users` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier
    pub id: i64,
    /// Login name (unique, case-insensitive)
    pub login: String,
    /// Email address (unique when present, may be empty)
    pub email: String,
    /// Display name
    pub name: String,
    /// Profile text
    pub about: String,
    /// Verifier token derived from (login, password)
    #[serde(skip_serializing)]
    pub passwd1: String,
    /// Verifier token derived from (email, password)
    #[serde(skip_serializing)]
    pub passwd2: String,
    /// Per-account random salt; `None` for accounts created before salting
    #[serde(skip_serializing)]
    pub salt: Option<String>,
    /// Unsuccessful login attempts since the last successful login
    pub ula_cnt: i64,
    /// Timestamp of the most recent unsuccessful attempt
    pub ula_time: Option<DateTime<Utc>>,
    /// Number of successful logins
    pub visits: i64,
    /// Timestamp of the most recent successful login
    pub last_login: Option<DateTime<Utc>>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Soft-delete flag; deleted accounts behave like unknown ones
    pub deleted: bool,
}

impl Account {
    /// Create a new account with hashed credentials.
    ///
    /// The verifier tokens must already be computed; see
    /// `services::hasher::hash_credentials`.
    pub fn new(
        login: String,
        email: String,
        name: String,
        about: String,
        passwd1: String,
        passwd2: String,
        salt: Option<String>,
    ) -> Self {
        Self {
            id: 0, // set by the database
            login,
            email,
            name,
            about,
            passwd1,
            passwd2,
            salt,
            ula_cnt: 0,
            ula_time: None,
            visits: 0,
            last_login: None,
            created_at: Utc::now(),
            deleted: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_new() {
        let account = Account::new(
            "alice".to_string(),
            "a@b.com".to_string(),
            "Alice".to_string(),
            String::new(),
            "tok1".to_string(),
            "tok2".to_string(),
            Some("s4lt".to_string()),
        );

        assert_eq!(account.id, 0);
        assert_eq!(account.ula_cnt, 0);
        assert_eq!(account.visits, 0);
        assert!(!account.deleted);
        assert!(account.salt.is_some());
    }
}
