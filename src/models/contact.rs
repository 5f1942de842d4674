//! Contact message model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One message left through the contact form.
///
/// `user_id` is 0 when the sender was not logged in; the email is whatever
/// the sender typed and is not verified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactMessage {
    pub user_id: i64,
    pub email: String,
    pub message: String,
    pub created: DateTime<Utc>,
}
