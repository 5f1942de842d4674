//! Authentication and session lifecycle
//!
//! Ties the in-memory session table to the persistent store: anonymous
//! session start, login with brute-force lockout, session validation with
//! silent re-login from a remembered cookie, logout, account creation and
//! account updates.

use crate::config::AuthConfig;
use crate::db::repositories::{AccountRepository, LoginRepository};
use crate::error::AuthError;
use crate::models::{Account, LoginRecord};
use crate::services::hasher::{self, SESID_LEN};
use crate::session::{SessionHandle, SessionSlot, SessionTable};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Maximum login length, matches the column width
const MAX_LOGIN_LEN: usize = 30;
/// Maximum email length
const MAX_EMAIL_LEN: usize = 120;

/// A session as seen by a request handler
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub handle: SessionHandle,
    pub sesid: String,
    pub logged: bool,
    pub user_id: i64,
    pub login: String,
    pub name: String,
}

/// Result of a successful login
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub session: SessionInfo,
    /// Days the logged cookie should live, `None` for a session cookie
    pub cookie_days: Option<i64>,
}

/// New-account input, validated by `create_account`
#[derive(Debug, Clone, Default)]
pub struct NewAccount {
    pub login: String,
    pub email: String,
    pub name: String,
    pub about: String,
    pub password: String,
    pub password_confirm: String,
    /// Honeypot field, must stay empty
    pub website: String,
}

/// Account-update input, validated by `update_account`
#[derive(Debug, Clone, Default)]
pub struct AccountUpdate {
    pub login: String,
    pub email: String,
    pub name: String,
    pub about: String,
    /// Current password, required for every update
    pub old_password: String,
    /// New password; empty keeps the current one
    pub password: String,
    pub password_confirm: String,
    /// Close the account instead of updating it
    pub delete: bool,
}

/// Outcome of an account update
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    Updated,
    /// Account closed; the sesid to keep in the anonymous cookie
    Deleted { sesid: String },
}

/// Authentication service
pub struct AuthService {
    accounts: Arc<dyn AccountRepository>,
    logins: Arc<dyn LoginRepository>,
    sessions: Arc<SessionTable>,
    config: AuthConfig,
}

impl AuthService {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        logins: Arc<dyn LoginRepository>,
        sessions: Arc<SessionTable>,
        config: AuthConfig,
    ) -> Self {
        Self {
            accounts,
            logins,
            sessions,
            config,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionTable> {
        &self.sessions
    }

    /// Start an anonymous session for a first-time visitor
    pub async fn start_anonymous(
        &self,
        uagent: &str,
        ip: &str,
    ) -> Result<SessionInfo, AuthError> {
        let now = Utc::now();
        let sesid = hasher::random_token(SESID_LEN);
        let slot = SessionSlot::anonymous(sesid.clone(), uagent.to_string(), ip.to_string(), now);

        let handle = self
            .sessions
            .acquire(slot)
            .await
            .ok_or(AuthError::ResourceExhausted)?;

        debug!(slot = handle.index(), "Started anonymous session");
        Ok(SessionInfo {
            handle,
            sesid,
            logged: false,
            user_id: 0,
            login: String::new(),
            name: String::new(),
        })
    }

    /// Authenticate a visitor by login or email.
    ///
    /// When `anonymous` points at the visitor's current anonymous slot the
    /// slot is upgraded in place and keeps its sesid, so the cookie value
    /// does not change across login.
    pub async fn login(
        &self,
        identity: &str,
        password: &str,
        remember: bool,
        anonymous: Option<SessionHandle>,
        uagent: &str,
        ip: &str,
    ) -> Result<LoginOutcome, AuthError> {
        if identity.is_empty() || password.is_empty() {
            return Err(AuthError::InvalidRequest);
        }

        let now = Utc::now();
        let account = self
            .accounts
            .get_by_identity(identity)
            .await?
            .filter(|a| !a.deleted)
            .ok_or(AuthError::InvalidCredentials)?;

        if lockout_active(account.ula_cnt, account.ula_time, now) {
            warn!(user_id = account.id, ula_cnt = account.ula_cnt, "Login attempt during lockout");
            return Err(AuthError::RateLimited);
        }

        let (token1, token2) = hasher::hash_credentials(
            &account.login,
            &account.email,
            password,
            account.salt.as_deref(),
        );
        if token1 != account.passwd1 || token2 != account.passwd2 {
            self.accounts.record_failed_login(account.id, now).await?;
            info!(user_id = account.id, "Failed login attempt");
            return Err(AuthError::InvalidCredentials);
        }

        if account.ula_cnt > 0 {
            self.accounts.clear_failed_logins(account.id).await?;
        }

        // accounts created before per-account salting get one now
        if account.salt.is_none() {
            let salt = hasher::generate_salt();
            let (p1, p2) =
                hasher::hash_credentials(&account.login, &account.email, password, Some(&salt));
            self.accounts
                .set_password(account.id, &p1, &p2, &salt)
                .await?;
            info!(user_id = account.id, "Re-hashed legacy credentials with fresh salt");
        }

        // reuse the visitor's anonymous slot when they have one
        let (handle, sesid) = match anonymous {
            Some(handle) => match self.sessions.get(handle).await {
                Some(slot) if !slot.logged => (handle, slot.sesid),
                _ => self.fresh_slot(uagent, ip, now).await?,
            },
            None => self.fresh_slot(uagent, ip, now).await?,
        };

        // persist before upgrading so a crash cannot leave a logged slot
        // without its store record
        self.logins
            .insert(&LoginRecord {
                user_id: account.id,
                sesid: sesid.clone(),
                uagent: uagent.to_string(),
                ip: ip.to_string(),
                created: now,
                last_used: now,
            })
            .await?;
        self.accounts.record_visit(account.id, now).await?;

        self.sessions
            .upgrade(
                handle,
                account.id,
                &account.login,
                &account.email,
                &account.name,
                &account.about,
                now,
            )
            .await;

        info!(user_id = account.id, slot = handle.index(), "User logged in");
        Ok(LoginOutcome {
            session: SessionInfo {
                handle,
                sesid,
                logged: true,
                user_id: account.id,
                login: account.login,
                name: account.name,
            },
            cookie_days: remember.then_some(self.config.remember_days),
        })
    }

    /// Resolve a logged cookie to a live session.
    ///
    /// Falls back to the persistent store when the in-memory slot is gone
    /// (idle sweep or restart) and silently re-logs the user in, unless the
    /// record has passed its age ceiling.
    pub async fn validate_session(
        &self,
        sesid: &str,
        uagent: &str,
        ip: &str,
    ) -> Result<SessionInfo, AuthError> {
        let now = Utc::now();

        if let Some(handle) = self.sessions.find(sesid, uagent, true).await {
            self.sessions.touch(handle, now).await;
            let slot = self.sessions.get(handle).await.ok_or(AuthError::ExpiredSession)?;
            return Ok(SessionInfo {
                handle,
                sesid: slot.sesid,
                logged: true,
                user_id: slot.user_id,
                login: slot.login,
                name: slot.name,
            });
        }

        let record = self
            .logins
            .get_by_sesid_uagent(sesid, uagent)
            .await?
            .ok_or(AuthError::ExpiredSession)?;

        // age ceiling applies regardless of recent use
        if record.is_past_ceiling(now, self.config.login_max_age_days) {
            self.logins.delete_by_sesid_uagent(sesid, uagent).await?;
            debug!(user_id = record.user_id, "Removed login record past its age ceiling");
            return Err(AuthError::ExpiredSession);
        }

        let account = match self.accounts.get_by_id(record.user_id).await? {
            Some(a) if !a.deleted => a,
            _ => {
                self.logins.delete_by_sesid_uagent(sesid, uagent).await?;
                return Err(AuthError::ExpiredSession);
            }
        };

        self.logins.touch_last_used(sesid, uagent, now).await?;
        self.accounts.record_visit(account.id, now).await?;

        let mut slot =
            SessionSlot::anonymous(sesid.to_string(), uagent.to_string(), ip.to_string(), now);
        slot.logged = true;
        slot.user_id = account.id;
        slot.login = account.login.clone();
        slot.email = account.email.clone();
        slot.name = account.name.clone();
        slot.about = account.about.clone();

        let handle = self
            .sessions
            .acquire(slot)
            .await
            .ok_or(AuthError::ResourceExhausted)?;

        info!(user_id = account.id, slot = handle.index(), "Session restored from store");
        Ok(SessionInfo {
            handle,
            sesid: sesid.to_string(),
            logged: true,
            user_id: account.id,
            login: account.login,
            name: account.name,
        })
    }

    /// Log a session out.
    ///
    /// Every persistent record of the user goes away, so remembered logins
    /// on other devices die too. The slot itself is kept, downgraded to
    /// anonymous with the same sesid, and that sesid is returned for the
    /// anonymous cookie.
    pub async fn logout(&self, handle: SessionHandle) -> Result<String, AuthError> {
        let now = Utc::now();
        let slot = self
            .sessions
            .get(handle)
            .await
            .filter(|s| s.logged)
            .ok_or(AuthError::ExpiredSession)?;

        let removed = self.logins.delete_by_user(slot.user_id).await?;
        let sesid = self
            .sessions
            .downgrade(handle, now)
            .await
            .ok_or(AuthError::ExpiredSession)?;

        info!(user_id = slot.user_id, records = removed, "User logged out");
        Ok(sesid)
    }

    /// Close idle sessions and drop their persistent records.
    ///
    /// Returns how many sessions were closed.
    pub async fn sweep_idle(&self) -> Result<usize, AuthError> {
        let now = Utc::now();
        let idle_ttl = Duration::seconds(self.config.idle_timeout_secs);
        let closed = self.sessions.sweep_idle(now, idle_ttl).await;

        for (handle, slot) in &closed {
            if slot.logged {
                // a failed delete must not stop the rest of the sweep
                match self
                    .logins
                    .delete_by_sesid_uagent(&slot.sesid, &slot.uagent)
                    .await
                {
                    Ok(_) => debug!(
                        user_id = slot.user_id,
                        slot = handle.index(),
                        "Swept idle logged session"
                    ),
                    Err(e) => warn!(
                        user_id = slot.user_id,
                        slot = handle.index(),
                        "Failed to delete login record for swept session: {:#}",
                        e
                    ),
                }
            }
        }

        if !closed.is_empty() {
            info!(count = closed.len(), "Idle session sweep");
        }
        Ok(closed.len())
    }

    /// Register a new account
    pub async fn create_account(&self, input: &NewAccount) -> Result<Account, AuthError> {
        if !input.website.is_empty() {
            warn!("Honeypot field filled in during registration");
            return Err(AuthError::RobotDetected);
        }

        let login = input.login.trim();
        let email = input.email.trim();

        validate_login(login, self.config.min_login_len)?;
        if !email.is_empty() {
            validate_email(email)?;
        }
        validate_password(&input.password, &input.password_confirm, self.config.min_password_len)?;

        if self.accounts.login_exists(login).await? {
            return Err(AuthError::Validation("login is already taken".to_string()));
        }
        if !email.is_empty() && self.accounts.email_exists(email).await? {
            return Err(AuthError::Validation(
                "email is already registered".to_string(),
            ));
        }

        let salt = hasher::generate_salt();
        let (passwd1, passwd2) =
            hasher::hash_credentials(login, email, &input.password, Some(&salt));

        let account = self
            .accounts
            .create(&Account::new(
                login.to_string(),
                email.to_string(),
                input.name.trim().to_string(),
                input.about.trim().to_string(),
                passwd1,
                passwd2,
                Some(salt),
            ))
            .await?;

        info!(user_id = account.id, "Account created");
        Ok(account)
    }

    /// Update the logged-in user's account, or close it.
    ///
    /// The current password is always required: credential tokens are keyed
    /// on login and email, so any identity change needs the password to
    /// re-derive them.
    pub async fn update_account(
        &self,
        handle: SessionHandle,
        input: &AccountUpdate,
    ) -> Result<UpdateOutcome, AuthError> {
        let slot = self
            .sessions
            .get(handle)
            .await
            .filter(|s| s.logged)
            .ok_or(AuthError::ExpiredSession)?;

        let account = self
            .accounts
            .get_by_id(slot.user_id)
            .await?
            .filter(|a| !a.deleted)
            .ok_or(AuthError::ExpiredSession)?;

        let (old1, old2) = hasher::hash_credentials(
            &account.login,
            &account.email,
            &input.old_password,
            account.salt.as_deref(),
        );
        if old1 != account.passwd1 || old2 != account.passwd2 {
            return Err(AuthError::InvalidCredentials);
        }

        if input.delete {
            self.accounts.soft_delete(account.id).await?;
            self.logins.delete_by_user(account.id).await?;
            let sesid = self
                .sessions
                .downgrade(handle, Utc::now())
                .await
                .ok_or(AuthError::ExpiredSession)?;
            info!(user_id = account.id, "Account closed");
            return Ok(UpdateOutcome::Deleted { sesid });
        }

        let login = input.login.trim();
        let email = input.email.trim();

        // on a rejected edit, stash the submitted values in the slot so the
        // form can be repopulated without committing anything
        if let Err(e) = self.validate_update(&account, login, email, input).await {
            self.sessions
                .with_slot(handle, |slot| {
                    slot.login_tmp = login.to_string();
                    slot.email_tmp = email.to_string();
                    slot.name_tmp = input.name.trim().to_string();
                    slot.about_tmp = input.about.trim().to_string();
                })
                .await;
            return Err(e);
        }

        let password = if input.password.is_empty() {
            &input.old_password
        } else {
            &input.password
        };

        let salt = hasher::generate_salt();
        let (passwd1, passwd2) = hasher::hash_credentials(login, email, password, Some(&salt));

        let mut updated = account.clone();
        updated.login = login.to_string();
        updated.email = email.to_string();
        updated.name = input.name.trim().to_string();
        updated.about = input.about.trim().to_string();
        updated.passwd1 = passwd1;
        updated.passwd2 = passwd2;
        updated.salt = Some(salt);
        self.accounts.update_profile(&updated).await?;

        self.sessions
            .with_slot(handle, |slot| {
                slot.login = updated.login.clone();
                slot.email = updated.email.clone();
                slot.name = updated.name.clone();
                slot.about = updated.about.clone();
                slot.login_tmp.clear();
                slot.email_tmp.clear();
                slot.name_tmp.clear();
                slot.about_tmp.clear();
            })
            .await;

        info!(user_id = account.id, "Account updated");
        Ok(UpdateOutcome::Updated)
    }

    async fn validate_update(
        &self,
        account: &Account,
        login: &str,
        email: &str,
        input: &AccountUpdate,
    ) -> Result<(), AuthError> {
        validate_login(login, self.config.min_login_len)?;
        if !email.is_empty() {
            validate_email(email)?;
        }

        if !login.eq_ignore_ascii_case(&account.login) && self.accounts.login_exists(login).await? {
            return Err(AuthError::Validation("login is already taken".to_string()));
        }
        if !email.is_empty()
            && !email.eq_ignore_ascii_case(&account.email)
            && self.accounts.email_exists(email).await?
        {
            return Err(AuthError::Validation(
                "email is already registered".to_string(),
            ));
        }

        if !input.password.is_empty() {
            validate_password(
                &input.password,
                &input.password_confirm,
                self.config.min_password_len,
            )?;
        }
        Ok(())
    }

    async fn fresh_slot(
        &self,
        uagent: &str,
        ip: &str,
        now: DateTime<Utc>,
    ) -> Result<(SessionHandle, String), AuthError> {
        let sesid = hasher::random_token(SESID_LEN);
        let slot = SessionSlot::anonymous(sesid.clone(), uagent.to_string(), ip.to_string(), now);
        let handle = self
            .sessions
            .acquire(slot)
            .await
            .ok_or(AuthError::ResourceExhausted)?;
        Ok((handle, sesid))
    }
}

/// Escalating cooldown after repeated failed logins: a minute after 4
/// failures, ten minutes after 5, a full hour from 6 on.
fn lockout_active(ula_cnt: i64, ula_time: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    let Some(since) = ula_time else {
        return false;
    };
    let elapsed = now - since;
    (ula_cnt >= 6 && elapsed < Duration::hours(1))
        || (ula_cnt == 5 && elapsed < Duration::minutes(10))
        || (ula_cnt == 4 && elapsed < Duration::minutes(1))
}

fn validate_login(login: &str, min_len: usize) -> Result<(), AuthError> {
    if login.len() < min_len {
        return Err(AuthError::Validation(format!(
            "login must be at least {} characters",
            min_len
        )));
    }
    if login.len() > MAX_LOGIN_LEN {
        return Err(AuthError::Validation(format!(
            "login must be at most {} characters",
            MAX_LOGIN_LEN
        )));
    }
    if !login
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '\''))
    {
        return Err(AuthError::Validation(
            "login may only contain letters, digits, dots, underscores, hyphens and apostrophes"
                .to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn validate_email(email: &str) -> Result<(), AuthError> {
    let invalid = || AuthError::Validation("email address is not valid".to_string());

    if email.len() < 3 || email.len() > MAX_EMAIL_LEN {
        return Err(invalid());
    }
    if email.chars().filter(|&c| c == '@').count() != 1 {
        return Err(invalid());
    }
    if email.starts_with('@') || email.ends_with('@') {
        return Err(invalid());
    }
    if !email
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '_' | '-'))
    {
        return Err(invalid());
    }
    Ok(())
}

fn validate_password(password: &str, confirm: &str, min_len: usize) -> Result<(), AuthError> {
    if password.len() < min_len {
        return Err(AuthError::Validation(format!(
            "password must be at least {} characters",
            min_len
        )));
    }
    if password != confirm {
        return Err(AuthError::Validation(
            "passwords do not match".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{
        AccountRepository, LoginRepository, SqlxAccountRepository, SqlxLoginRepository,
    };
    use crate::db::{create_test_pool, migrations, DynDatabasePool};

    const UA: &str = "Mozilla/5.0 (test)";
    const IP: &str = "192.0.2.1";

    async fn test_pool() -> DynDatabasePool {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        pool
    }

    fn service_on(pool: DynDatabasePool, capacity: usize) -> AuthService {
        AuthService::new(
            SqlxAccountRepository::boxed(pool.clone()),
            SqlxLoginRepository::boxed(pool),
            Arc::new(SessionTable::new(capacity)),
            AuthConfig::default(),
        )
    }

    async fn setup() -> AuthService {
        service_on(test_pool().await, 16)
    }

    fn new_account(login: &str, email: &str, password: &str) -> NewAccount {
        NewAccount {
            login: login.to_string(),
            email: email.to_string(),
            name: "Test".to_string(),
            password: password.to_string(),
            password_confirm: password.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_then_login() {
        let service = setup().await;
        service
            .create_account(&new_account("alice", "alice@example.com", "hunter22"))
            .await
            .expect("Failed to create account");

        let outcome = service
            .login("alice", "hunter22", false, None, UA, IP)
            .await
            .expect("Login failed");
        assert!(outcome.session.logged);
        assert_eq!(outcome.session.login, "alice");
        assert!(outcome.cookie_days.is_none());

        // email works as the identity too
        let by_email = service
            .login("ALICE@example.COM", "hunter22", true, None, UA, IP)
            .await
            .expect("Login by email failed");
        assert_eq!(by_email.cookie_days, Some(30));
    }

    #[tokio::test]
    async fn test_wrong_password_is_invalid_credentials() {
        let service = setup().await;
        service
            .create_account(&new_account("bob", "bob@example.com", "hunter22"))
            .await
            .unwrap();

        let err = service
            .login("bob", "wrong", false, None, UA, IP)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));

        // unknown identity reads exactly the same
        let err = service
            .login("nobody", "whatever", false, None, UA, IP)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_lockout_after_repeated_failures() {
        let service = setup().await;
        service
            .create_account(&new_account("carol", "carol@example.com", "hunter22"))
            .await
            .unwrap();

        for _ in 0..4 {
            let err = service
                .login("carol", "wrong", false, None, UA, IP)
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::InvalidCredentials));
        }

        // the fifth attempt is refused outright, correct password or not
        let err = service
            .login("carol", "hunter22", false, None, UA, IP)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::RateLimited));
        let err = service
            .login("carol", "wrong", false, None, UA, IP)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::RateLimited));
    }

    #[tokio::test]
    async fn test_lockout_lapses_after_the_window() {
        let pool = test_pool().await;
        let accounts = SqlxAccountRepository::boxed(pool.clone());
        let service = service_on(pool, 16);
        let account = service
            .create_account(&new_account("carl", "carl@example.com", "hunter22"))
            .await
            .unwrap();

        // four failures whose cooldown minute has already passed
        let stale = Utc::now() - Duration::minutes(2);
        for _ in 0..4 {
            accounts.record_failed_login(account.id, stale).await.unwrap();
        }

        service
            .login("carl", "hunter22", false, None, UA, IP)
            .await
            .expect("Login should succeed once the cooldown lapsed");

        let cleared = accounts.get_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(cleared.ula_cnt, 0);
    }

    #[tokio::test]
    async fn test_successful_login_clears_failure_counter() {
        let service = setup().await;
        service
            .create_account(&new_account("dave", "dave@example.com", "hunter22"))
            .await
            .unwrap();

        for _ in 0..3 {
            let _ = service.login("dave", "wrong", false, None, UA, IP).await;
        }
        service
            .login("dave", "hunter22", false, None, UA, IP)
            .await
            .expect("Login should succeed below the lockout threshold");

        // counter reset: three more failures still stay below lockout
        for _ in 0..3 {
            let _ = service.login("dave", "wrong", false, None, UA, IP).await;
        }
        service
            .login("dave", "hunter22", false, None, UA, IP)
            .await
            .expect("Counter should have been cleared");
    }

    #[tokio::test]
    async fn test_login_reuses_anonymous_sesid() {
        let service = setup().await;
        service
            .create_account(&new_account("erin", "erin@example.com", "hunter22"))
            .await
            .unwrap();

        let anon = service.start_anonymous(UA, IP).await.unwrap();
        let outcome = service
            .login("erin", "hunter22", false, Some(anon.handle), UA, IP)
            .await
            .unwrap();

        assert_eq!(outcome.session.sesid, anon.sesid);
        assert_eq!(outcome.session.handle, anon.handle);
    }

    #[tokio::test]
    async fn test_full_table_is_resource_exhausted() {
        let service = service_on(test_pool().await, 1);
        service
            .create_account(&new_account("full", "full@example.com", "hunter22"))
            .await
            .unwrap();

        service.start_anonymous(UA, IP).await.unwrap();
        let err = service.start_anonymous(UA, IP).await.unwrap_err();
        assert!(matches!(err, AuthError::ResourceExhausted));

        let err = service
            .login("full", "hunter22", false, None, UA, IP)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ResourceExhausted));
    }

    #[tokio::test]
    async fn test_legacy_account_gets_salted_on_login() {
        let pool = test_pool().await;
        let accounts = SqlxAccountRepository::boxed(pool.clone());

        // account stored before per-account salting existed
        let (p1, p2) = hasher::hash_credentials("legacy", "legacy@example.com", "hunter22", None);
        accounts
            .create(&Account::new(
                "legacy".to_string(),
                "legacy@example.com".to_string(),
                String::new(),
                String::new(),
                p1,
                p2,
                None,
            ))
            .await
            .unwrap();

        let service = service_on(pool, 16);
        service
            .login("legacy", "hunter22", false, None, UA, IP)
            .await
            .expect("Legacy login failed");

        let migrated = accounts.get_by_identity("legacy").await.unwrap().unwrap();
        assert!(migrated.salt.is_some());

        // and the re-hashed credentials still verify
        service
            .login("legacy", "hunter22", false, None, UA, IP)
            .await
            .expect("Login after salt migration failed");
    }

    #[tokio::test]
    async fn test_session_restored_from_store_after_restart() {
        let pool = test_pool().await;
        let service = service_on(pool.clone(), 16);
        service
            .create_account(&new_account("frank", "frank@example.com", "hunter22"))
            .await
            .unwrap();
        let outcome = service
            .login("frank", "hunter22", true, None, UA, IP)
            .await
            .unwrap();

        // fresh session table simulates a process restart
        let restarted = service_on(pool, 16);
        let restored = restarted
            .validate_session(&outcome.session.sesid, UA, IP)
            .await
            .expect("Session should restore from the store");
        assert!(restored.logged);
        assert_eq!(restored.login, "frank");

        // but only from the same client
        let err = restarted
            .validate_session(&outcome.session.sesid, "other-agent", IP)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ExpiredSession));
    }

    #[tokio::test]
    async fn test_login_record_age_ceiling() {
        let pool = test_pool().await;
        let logins = SqlxLoginRepository::boxed(pool.clone());
        let service = service_on(pool.clone(), 16);
        let account = service
            .create_account(&new_account("grace", "grace@example.com", "hunter22"))
            .await
            .unwrap();

        let now = Utc::now();
        for (sesid, age_days) in [("a".repeat(15), 29), ("b".repeat(15), 31)] {
            logins
                .insert(&LoginRecord {
                    user_id: account.id,
                    sesid: sesid.clone(),
                    uagent: UA.to_string(),
                    ip: IP.to_string(),
                    created: now - Duration::days(age_days),
                    last_used: now,
                })
                .await
                .unwrap();
        }

        // 29 days old: still good
        service
            .validate_session(&"a".repeat(15), UA, IP)
            .await
            .expect("29-day-old record should still validate");

        // 31 days old: refused and removed, despite recent use
        let err = service
            .validate_session(&"b".repeat(15), UA, IP)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ExpiredSession));
        assert!(logins
            .get_by_sesid_uagent(&"b".repeat(15), UA)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_logout_keeps_anonymous_slot_and_clears_records() {
        let pool = test_pool().await;
        let logins = SqlxLoginRepository::boxed(pool.clone());
        let service = service_on(pool.clone(), 16);
        service
            .create_account(&new_account("heidi", "heidi@example.com", "hunter22"))
            .await
            .unwrap();

        // logged in on two devices
        let desktop = service
            .login("heidi", "hunter22", true, None, "desktop", IP)
            .await
            .unwrap();
        let phone = service
            .login("heidi", "hunter22", true, None, "phone", IP)
            .await
            .unwrap();

        let sesid = service.logout(desktop.session.handle).await.unwrap();
        assert_eq!(sesid, desktop.session.sesid);

        // slot survived as anonymous
        let slot = service.sessions().get(desktop.session.handle).await.unwrap();
        assert!(!slot.logged);
        assert_eq!(slot.sesid, sesid);

        // both devices' records are gone
        assert!(logins
            .get_by_sesid_uagent(&desktop.session.sesid, "desktop")
            .await
            .unwrap()
            .is_none());
        assert!(logins
            .get_by_sesid_uagent(&phone.session.sesid, "phone")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_sweep_removes_idle_session_and_record() {
        let pool = test_pool().await;
        let logins = SqlxLoginRepository::boxed(pool.clone());
        let service = service_on(pool.clone(), 16);
        service
            .create_account(&new_account("ivan", "ivan@example.com", "hunter22"))
            .await
            .unwrap();
        let outcome = service
            .login("ivan", "hunter22", true, None, UA, IP)
            .await
            .unwrap();

        // backdate the slot past the idle timeout
        service
            .sessions()
            .with_slot(outcome.session.handle, |slot| {
                slot.last_activity = Utc::now() - Duration::seconds(700);
            })
            .await;

        let swept = service.sweep_idle().await.unwrap();
        assert_eq!(swept, 1);
        assert!(service.sessions().get(outcome.session.handle).await.is_none());
        assert!(logins
            .get_by_sesid_uagent(&outcome.session.sesid, UA)
            .await
            .unwrap()
            .is_none());
    }

    /// Fails deletes for one session id, passes everything else through
    struct FlakyDeleteRepository {
        inner: Arc<dyn LoginRepository>,
        poisoned_sesid: String,
    }

    #[async_trait::async_trait]
    impl LoginRepository for FlakyDeleteRepository {
        async fn insert(&self, record: &LoginRecord) -> anyhow::Result<()> {
            self.inner.insert(record).await
        }

        async fn get_by_sesid_uagent(
            &self,
            sesid: &str,
            uagent: &str,
        ) -> anyhow::Result<Option<LoginRecord>> {
            self.inner.get_by_sesid_uagent(sesid, uagent).await
        }

        async fn touch_last_used(
            &self,
            sesid: &str,
            uagent: &str,
            at: DateTime<Utc>,
        ) -> anyhow::Result<()> {
            self.inner.touch_last_used(sesid, uagent, at).await
        }

        async fn delete_by_sesid_uagent(&self, sesid: &str, uagent: &str) -> anyhow::Result<()> {
            if sesid == self.poisoned_sesid {
                return Err(anyhow::anyhow!("connection lost"));
            }
            self.inner.delete_by_sesid_uagent(sesid, uagent).await
        }

        async fn delete_by_user(&self, user_id: i64) -> anyhow::Result<u64> {
            self.inner.delete_by_user(user_id).await
        }
    }

    #[tokio::test]
    async fn test_sweep_continues_past_a_failed_delete() {
        let pool = test_pool().await;
        let logins = SqlxLoginRepository::boxed(pool.clone());
        let accounts = SqlxAccountRepository::boxed(pool.clone());
        let sessions = Arc::new(SessionTable::new(16));

        let service = AuthService::new(
            accounts.clone(),
            logins.clone(),
            sessions.clone(),
            AuthConfig::default(),
        );
        service
            .create_account(&new_account("nadia", "nadia@example.com", "hunter22"))
            .await
            .unwrap();
        let first = service
            .login("nadia", "hunter22", true, None, UA, IP)
            .await
            .unwrap();
        let second = service
            .login("nadia", "hunter22", true, None, "other UA", IP)
            .await
            .unwrap();

        // same table, but deletes for the first session now fail
        let flaky = AuthService::new(
            accounts,
            Arc::new(FlakyDeleteRepository {
                inner: logins.clone(),
                poisoned_sesid: first.session.sesid.clone(),
            }),
            sessions.clone(),
            AuthConfig::default(),
        );

        for outcome in [&first, &second] {
            sessions
                .with_slot(outcome.session.handle, |slot| {
                    slot.last_activity = Utc::now() - Duration::seconds(700);
                })
                .await;
        }

        let swept = flaky.sweep_idle().await.unwrap();
        assert_eq!(swept, 2);

        // the second session's record was still deleted
        assert!(logins
            .get_by_sesid_uagent(&second.session.sesid, "other UA")
            .await
            .unwrap()
            .is_none());
        // the first one survives only because its delete failed
        assert!(logins
            .get_by_sesid_uagent(&first.session.sesid, UA)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_create_account_validation() {
        let service = setup().await;

        // honeypot
        let mut robot = new_account("robot", "", "hunter22");
        robot.website = "https://spam.example".to_string();
        assert!(matches!(
            service.create_account(&robot).await.unwrap_err(),
            AuthError::RobotDetected
        ));

        // short password
        let err = service
            .create_account(&new_account("joe", "", "abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));

        // password mismatch
        let mut mismatch = new_account("joe", "", "hunter22");
        mismatch.password_confirm = "hunter23".to_string();
        assert!(matches!(
            service.create_account(&mismatch).await.unwrap_err(),
            AuthError::Validation(_)
        ));

        // bad login charset
        let err = service
            .create_account(&new_account("joe smith", "", "hunter22"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));

        // bad email
        let err = service
            .create_account(&new_account("joe", "not-an-email", "hunter22"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }

    #[tokio::test]
    async fn test_duplicate_login_is_case_insensitive() {
        let service = setup().await;
        service
            .create_account(&new_account("Kate", "kate@example.com", "hunter22"))
            .await
            .unwrap();

        let err = service
            .create_account(&new_account("kate", "other@example.com", "hunter22"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));

        let err = service
            .create_account(&new_account("kate2", "KATE@example.com", "hunter22"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }

    #[tokio::test]
    async fn test_update_account_requires_current_password() {
        let service = setup().await;
        service
            .create_account(&new_account("lena", "lena@example.com", "hunter22"))
            .await
            .unwrap();
        let outcome = service
            .login("lena", "hunter22", false, None, UA, IP)
            .await
            .unwrap();

        let update = AccountUpdate {
            login: "lena".to_string(),
            email: "lena@example.com".to_string(),
            name: "Lena L".to_string(),
            old_password: "wrong".to_string(),
            ..Default::default()
        };
        let err = service
            .update_account(outcome.session.handle, &update)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_update_account_rederives_tokens_on_identity_change() {
        let service = setup().await;
        service
            .create_account(&new_account("mark", "mark@example.com", "hunter22"))
            .await
            .unwrap();
        let outcome = service
            .login("mark", "hunter22", false, None, UA, IP)
            .await
            .unwrap();

        let update = AccountUpdate {
            login: "marcus".to_string(),
            email: "marcus@example.com".to_string(),
            old_password: "hunter22".to_string(),
            ..Default::default()
        };
        service
            .update_account(outcome.session.handle, &update)
            .await
            .expect("Update failed");

        // old identity is gone, new one logs in with the unchanged password
        assert!(matches!(
            service
                .login("mark", "hunter22", false, None, UA, IP)
                .await
                .unwrap_err(),
            AuthError::InvalidCredentials
        ));
        service
            .login("marcus", "hunter22", false, None, UA, IP)
            .await
            .expect("Login with new identity failed");
    }

    #[tokio::test]
    async fn test_rejected_update_stashes_pending_edits() {
        let service = setup().await;
        service
            .create_account(&new_account("olga", "olga@example.com", "hunter22"))
            .await
            .unwrap();
        let outcome = service
            .login("olga", "hunter22", false, None, UA, IP)
            .await
            .unwrap();

        // bad email gets the update rejected
        let update = AccountUpdate {
            login: "olga".to_string(),
            email: "not-an-email".to_string(),
            name: "Olga O".to_string(),
            old_password: "hunter22".to_string(),
            ..Default::default()
        };
        let err = service
            .update_account(outcome.session.handle, &update)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));

        // submitted values are held in the slot for form repopulation,
        // the committed fields are untouched
        let slot = service.sessions().get(outcome.session.handle).await.unwrap();
        assert_eq!(slot.email_tmp, "not-an-email");
        assert_eq!(slot.name_tmp, "Olga O");
        assert_eq!(slot.email, "olga@example.com");
        assert_eq!(slot.name, "Test");
    }

    #[tokio::test]
    async fn test_delete_account() {
        let pool = test_pool().await;
        let service = service_on(pool.clone(), 16);
        service
            .create_account(&new_account("nina", "nina@example.com", "hunter22"))
            .await
            .unwrap();
        let outcome = service
            .login("nina", "hunter22", true, None, UA, IP)
            .await
            .unwrap();

        let update = AccountUpdate {
            old_password: "hunter22".to_string(),
            delete: true,
            ..Default::default()
        };
        let result = service
            .update_account(outcome.session.handle, &update)
            .await
            .unwrap();
        assert!(matches!(result, UpdateOutcome::Deleted { .. }));

        // closed accounts behave like unknown ones
        assert!(matches!(
            service
                .login("nina", "hunter22", false, None, UA, IP)
                .await
                .unwrap_err(),
            AuthError::InvalidCredentials
        ));
    }

    #[test]
    fn test_lockout_windows() {
        let now = Utc::now();
        let ago = |secs: i64| Some(now - Duration::seconds(secs));

        // below 4 failures there is never a cooldown
        assert!(!lockout_active(3, ago(1), now));
        assert!(!lockout_active(0, None, now));

        // 4 failures: one minute
        assert!(lockout_active(4, ago(30), now));
        assert!(!lockout_active(4, ago(90), now));

        // 5 failures: ten minutes
        assert!(lockout_active(5, ago(300), now));
        assert!(!lockout_active(5, ago(700), now));

        // 6 or more: a full hour
        assert!(lockout_active(6, ago(3000), now));
        assert!(!lockout_active(6, ago(4000), now));
        assert!(lockout_active(12, ago(3000), now));
    }
}
