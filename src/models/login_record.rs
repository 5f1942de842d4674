//! Persistent login record model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One logged-in browser instance, keyed by (session id, user agent).
///
/// Created at successful login, deleted at logout, and treated as invalid
/// once older than the configured age ceiling regardless of activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRecord {
    /// Associated user id
    pub user_id: i64,
    /// Opaque session id carried by the cookie
    pub sesid: String,
    /// User agent string of the browser that logged in
    pub uagent: String,
    /// Source IP at login time
    pub ip: String,
    /// Creation timestamp
    pub created: DateTime<Utc>,
    /// Last time this record authenticated a request
    pub last_used: DateTime<Utc>,
}

impl LoginRecord {
    /// True if the record was created more than `max_age_days` ago.
    pub fn is_past_ceiling(&self, now: DateTime<Utc>, max_age_days: i64) -> bool {
        self.created < now - chrono::Duration::days(max_age_days)
    }
}

/// A single-use, time-boxed password-recovery key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetToken {
    /// Fixed-length random alphanumeric key
    pub linkkey: String,
    /// Account the key was issued for
    pub user_id: i64,
    /// Issue timestamp; the key is valid for a fixed window from here
    pub created: DateTime<Utc>,
}
