//! Contact-form handling
//!
//! Stores submitted messages and forwards a copy to the site contact
//! address. The form is open to visitors without an account; a logged-in
//! sender's user id is kept alongside the message.

use crate::db::repositories::ContactRepository;
use crate::error::AuthError;
use crate::models::ContactMessage;
use crate::services::auth::validate_email;
use crate::services::DynMailer;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// Contact-form service
pub struct ContactService {
    contacts: Arc<dyn ContactRepository>,
    mailer: DynMailer,
    /// Address the copy goes to; empty disables forwarding
    contact_email: String,
}

impl ContactService {
    pub fn new(contacts: Arc<dyn ContactRepository>, mailer: DynMailer, contact_email: String) -> Self {
        Self {
            contacts,
            mailer,
            contact_email,
        }
    }

    /// Store a contact message and forward a copy by email.
    ///
    /// The message text is required; the reply address is optional and left
    /// unverified. `user_id` is 0 for anonymous senders. A failed forward is
    /// logged but does not fail the submission, the stored row is the record.
    pub async fn submit(&self, user_id: i64, email: &str, message: &str) -> Result<(), AuthError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(AuthError::InvalidRequest);
        }

        let email = email.trim();
        if !email.is_empty() {
            validate_email(email)?;
        }

        self.contacts
            .insert(&ContactMessage {
                user_id,
                email: email.to_string(),
                message: message.to_string(),
                created: Utc::now(),
            })
            .await?;

        info!(user_id, "contact message stored");

        if !self.contact_email.is_empty() {
            let body = if email.is_empty() {
                message.to_string()
            } else {
                format!("From: {}\n\n{}", email, message)
            };
            if let Err(e) = self
                .mailer
                .send(&self.contact_email, "New contact message", &body)
                .await
            {
                warn!("failed to forward contact message: {:#}", e);
            }
        }

        Ok(())
    }
}
