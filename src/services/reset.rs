//! Password reset
//!
//! Three-step flow: request a link by email, redeem the link key, commit
//! the new password. The request step never reveals whether an email is
//! registered; a broken or unknown key is told apart from one that is
//! merely stale so the user knows whether to re-request.

use crate::config::AuthConfig;
use crate::db::repositories::{AccountRepository, LoginRepository, ResetTokenRepository};
use crate::error::AuthError;
use crate::models::ResetToken;
use crate::services::email::DynMailer;
use crate::services::hasher::{self, RESET_KEY_LEN};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

/// Password-reset service
pub struct ResetService {
    accounts: Arc<dyn AccountRepository>,
    logins: Arc<dyn LoginRepository>,
    tokens: Arc<dyn ResetTokenRepository>,
    mailer: DynMailer,
    config: AuthConfig,
    /// Base URL embedded in the emailed link
    public_url: String,
}

impl ResetService {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        logins: Arc<dyn LoginRepository>,
        tokens: Arc<dyn ResetTokenRepository>,
        mailer: DynMailer,
        config: AuthConfig,
        public_url: String,
    ) -> Self {
        Self {
            accounts,
            logins,
            tokens,
            mailer,
            config,
            public_url,
        }
    }

    /// Email a reset link to the given address.
    ///
    /// Succeeds whether or not the address is registered, so this endpoint
    /// cannot be used to probe for accounts. Only a real delivery failure
    /// surfaces as an error.
    pub async fn request(&self, email: &str) -> Result<(), AuthError> {
        if email.is_empty() {
            return Err(AuthError::InvalidRequest);
        }

        let account = match self.accounts.get_by_email(email).await? {
            Some(a) if !a.deleted => a,
            _ => {
                debug!("Reset requested for unknown or closed account");
                return Ok(());
            }
        };

        let linkkey = hasher::random_token(RESET_KEY_LEN);
        self.tokens
            .insert(&ResetToken {
                linkkey: linkkey.clone(),
                user_id: account.id,
                created: Utc::now(),
            })
            .await?;

        let link = format!("{}/reset/{}", self.public_url.trim_end_matches('/'), linkkey);
        let body = format!(
            "Hello,\n\n\
             A password reset was requested for your account. Open the link\n\
             below to choose a new password:\n\n\
             {}\n\n\
             The link is valid for {} hours. If you did not request this,\n\
             you can safely ignore this message.\n",
            link, self.config.reset_ttl_hours
        );
        self.mailer
            .send(&account.email, "Password reset", &body)
            .await?;

        info!(user_id = account.id, "Password reset link sent");
        Ok(())
    }

    /// Validate a link key from a reset URL.
    ///
    /// Returns the account id the key belongs to. A malformed or unknown
    /// key is reported as broken; a known but stale key as possibly
    /// expired. Stale keys are left in place so repeated clicks keep
    /// getting the same answer.
    pub async fn redeem(&self, linkkey: &str) -> Result<i64, AuthError> {
        if linkkey.len() != RESET_KEY_LEN {
            return Err(AuthError::LinkBroken);
        }

        let token = self
            .tokens
            .get_by_linkkey(linkkey)
            .await?
            .ok_or(AuthError::LinkBroken)?;

        if Utc::now() - token.created > Duration::hours(self.config.reset_ttl_hours) {
            return Err(AuthError::LinkMayBeExpired);
        }

        Ok(token.user_id)
    }

    /// Set a new password using a redeemed link key.
    ///
    /// The submitted email must match the account the key was issued for;
    /// a mismatch is reported the same way as a stale key so a guessed key
    /// alone gives nothing away. On success the key is consumed and every
    /// remembered login is revoked.
    pub async fn commit(
        &self,
        linkkey: &str,
        email: &str,
        password: &str,
        password_confirm: &str,
    ) -> Result<(), AuthError> {
        let user_id = self.redeem(linkkey).await?;

        if password.len() < self.config.min_password_len {
            return Err(AuthError::Validation(format!(
                "password must be at least {} characters",
                self.config.min_password_len
            )));
        }
        if password != password_confirm {
            return Err(AuthError::Validation("passwords do not match".to_string()));
        }

        let account = self
            .accounts
            .get_by_id(user_id)
            .await?
            .filter(|a| !a.deleted)
            .ok_or(AuthError::LinkMayBeExpired)?;

        if !account.email.eq_ignore_ascii_case(email) {
            return Err(AuthError::LinkMayBeExpired);
        }

        let salt = hasher::generate_salt();
        let (passwd1, passwd2) =
            hasher::hash_credentials(&account.login, &account.email, password, Some(&salt));
        self.accounts
            .set_password(account.id, &passwd1, &passwd2, &salt)
            .await?;

        // a changed password invalidates every remembered login
        self.logins.delete_by_user(account.id).await?;
        self.tokens.delete(linkkey).await?;
        self.accounts.clear_failed_logins(account.id).await?;

        info!(user_id = account.id, "Password reset completed");
        Ok(())
    }

    /// Delete reset keys past the retention window.
    ///
    /// Stale keys are kept for a grace period beyond their validity so a
    /// late click still reads as "may be expired" rather than broken.
    pub async fn purge_stale(&self) -> Result<u64, AuthError> {
        let cutoff = Utc::now()
            - Duration::hours(self.config.reset_ttl_hours)
            - Duration::days(STALE_KEY_RETENTION_DAYS);
        let purged = self.tokens.purge_older_than(cutoff).await?;
        if purged > 0 {
            info!(purged, "Purged stale password-reset keys");
        }
        Ok(purged)
    }
}

/// How long a key outlives its validity before it is purged
const STALE_KEY_RETENTION_DAYS: i64 = 7;
