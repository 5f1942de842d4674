//! Authentication API endpoints
//!
//! Handles HTTP requests for the session lifecycle:
//! - POST /api/v1/auth/session - Start an anonymous session
//! - POST /api/v1/auth/register - Account registration
//! - POST /api/v1/auth/login - Login
//! - POST /api/v1/auth/logout - Logout
//! - GET /api/v1/auth/me - Current session info
//! - PUT /api/v1/auth/account - Update or close the account
//! - POST /api/v1/auth/password-reset - Request a reset link
//! - GET /api/v1/auth/password-reset/{linkkey} - Check a reset link
//! - POST /api/v1/auth/password-reset/confirm - Set the new password
//! - GET /api/v1/auth/settings/{name} - Read a per-user setting
//! - PUT /api/v1/auth/settings/{name} - Store a per-user setting
//! - POST /api/v1/auth/contact - Submit a contact message
//!
//! Session identity travels in two cookies: "ls" for a logged-in session
//! and "as" for an anonymous one. Login moves the id from "as" to "ls",
//! logout moves it back.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap},
    response::{AppendHeaders, IntoResponse},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{
    cleared_cookie, cookie_value, remember_expiry, session_cookie, ApiError, AppState,
    ClientInfo, ANON_COOKIE, LOGGED_COOKIE,
};
use crate::error::AuthError;
use crate::services::auth::{AccountUpdate, NewAccount, SessionInfo, UpdateOutcome};

/// Request body for registration
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub login: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub about: String,
    pub password: String,
    pub password_confirm: String,
    /// Honeypot, real browsers leave it empty
    #[serde(default)]
    pub website: String,
}

/// Request body for login
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
    #[serde(default)]
    pub remember: bool,
}

/// Request body for account updates
#[derive(Debug, Deserialize)]
pub struct UpdateAccountRequest {
    pub login: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub about: String,
    pub old_password: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub password_confirm: String,
    #[serde(default)]
    pub delete: bool,
}

/// Request body for a reset-link request
#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub email: String,
}

/// Request body for the final reset step
#[derive(Debug, Deserialize)]
pub struct ResetConfirmRequest {
    pub linkkey: String,
    pub email: String,
    pub password: String,
    pub password_confirm: String,
}

/// Request body for storing a setting
#[derive(Debug, Deserialize)]
pub struct PutSettingRequest {
    pub value: String,
}

/// A per-user setting as returned to the client
#[derive(Debug, Serialize)]
pub struct SettingResponse {
    pub name: String,
    /// `None` when the setting was never stored
    pub value: Option<String>,
}

/// Request body for the contact form
#[derive(Debug, Deserialize)]
pub struct ContactRequest {
    #[serde(default)]
    pub email: String,
    pub message: String,
}

/// Session info returned to the client
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub logged: bool,
    pub user_id: i64,
    pub login: String,
    pub name: String,
}

impl From<SessionInfo> for SessionResponse {
    fn from(session: SessionInfo) -> Self {
        Self {
            logged: session.logged,
            user_id: session.user_id,
            login: session.login,
            name: session.name,
        }
    }
}

/// Build the auth router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/session", post(start_session))
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
        .route("/account", put(update_account))
        .route("/password-reset", post(request_reset))
        .route("/password-reset/{linkkey}", get(check_reset))
        .route("/password-reset/confirm", post(confirm_reset))
        .route("/settings/{name}", get(get_setting).put(put_setting))
        .route("/contact", post(submit_contact))
}

/// POST /session - start an anonymous session and set the "as" cookie
async fn start_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let client = ClientInfo::from_headers(&headers);

    // reuse a live anonymous session if the cookie still points at one
    if let Some(sesid) = cookie_value(&headers, ANON_COOKIE) {
        if let Some(handle) = state.auth.sessions().find(&sesid, &client.uagent, false).await {
            if let Some(slot) = state.auth.sessions().get(handle).await {
                if !slot.logged {
                    let body = SessionResponse {
                        logged: false,
                        user_id: 0,
                        login: String::new(),
                        name: String::new(),
                    };
                    return Ok((
                        AppendHeaders(vec![(
                            header::SET_COOKIE,
                            session_cookie(ANON_COOKIE, &sesid, None),
                        )]),
                        Json(body),
                    ));
                }
            }
        }
    }

    let session = state.auth.start_anonymous(&client.uagent, &client.ip).await?;
    Ok((
        AppendHeaders(vec![(
            header::SET_COOKIE,
            session_cookie(ANON_COOKIE, &session.sesid, None),
        )]),
        Json(SessionResponse::from(session)),
    ))
}

/// POST /register - create an account
async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let account = state
        .auth
        .create_account(&NewAccount {
            login: payload.login,
            email: payload.email,
            name: payload.name,
            about: payload.about,
            password: payload.password,
            password_confirm: payload.password_confirm,
            website: payload.website,
        })
        .await?;

    Ok(Json(SessionResponse {
        logged: false,
        user_id: account.id,
        login: account.login,
        name: account.name,
    }))
}

/// POST /login - authenticate and move the session id to the "ls" cookie
async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let client = ClientInfo::from_headers(&headers);

    let anonymous = match cookie_value(&headers, ANON_COOKIE) {
        Some(sesid) => state.auth.sessions().find(&sesid, &client.uagent, false).await,
        None => None,
    };

    let outcome = state
        .auth
        .login(
            &payload.login,
            &payload.password,
            payload.remember,
            anonymous,
            &client.uagent,
            &client.ip,
        )
        .await?;

    let expires = outcome.cookie_days.map(remember_expiry);
    let cookies = AppendHeaders(vec![
        (
            header::SET_COOKIE,
            session_cookie(LOGGED_COOKIE, &outcome.session.sesid, expires),
        ),
        (header::SET_COOKIE, cleared_cookie(ANON_COOKIE)),
    ]);

    Ok((cookies, Json(SessionResponse::from(outcome.session))))
}

/// GET /me - resolve the "ls" cookie to the current session
async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let session = logged_session(&state, &headers).await?;
    Ok(Json(SessionResponse::from(session)))
}

/// POST /logout - drop the login, keep an anonymous session
async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let session = logged_session(&state, &headers).await?;
    let sesid = state.auth.logout(session.handle).await?;

    let cookies = AppendHeaders(vec![
        (header::SET_COOKIE, cleared_cookie(LOGGED_COOKIE)),
        (
            header::SET_COOKIE,
            session_cookie(ANON_COOKIE, &sesid, None),
        ),
    ]);
    Ok((
        cookies,
        Json(SessionResponse {
            logged: false,
            user_id: 0,
            login: String::new(),
            name: String::new(),
        }),
    ))
}

/// PUT /account - update profile, credentials, or close the account
async fn update_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<UpdateAccountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = logged_session(&state, &headers).await?;

    let outcome = state
        .auth
        .update_account(
            session.handle,
            &AccountUpdate {
                login: payload.login,
                email: payload.email,
                name: payload.name,
                about: payload.about,
                old_password: payload.old_password,
                password: payload.password,
                password_confirm: payload.password_confirm,
                delete: payload.delete,
            },
        )
        .await?;

    match outcome {
        UpdateOutcome::Updated => {
            let refreshed = logged_session(&state, &headers).await?;
            Ok(Json(SessionResponse::from(refreshed)).into_response())
        }
        UpdateOutcome::Deleted { sesid } => {
            let cookies = AppendHeaders(vec![
                (header::SET_COOKIE, cleared_cookie(LOGGED_COOKIE)),
                (
                    header::SET_COOKIE,
                    session_cookie(ANON_COOKIE, &sesid, None),
                ),
            ]);
            Ok((
                cookies,
                Json(SessionResponse {
                    logged: false,
                    user_id: 0,
                    login: String::new(),
                    name: String::new(),
                }),
            )
                .into_response())
        }
    }
}

/// POST /password-reset - email a reset link
async fn request_reset(
    State(state): State<AppState>,
    Json(payload): Json<ResetRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.reset.request(&payload.email).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

/// GET /password-reset/{linkkey} - check a link before showing the form
async fn check_reset(
    State(state): State<AppState>,
    Path(linkkey): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.reset.redeem(&linkkey).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

/// POST /password-reset/confirm - set the new password
async fn confirm_reset(
    State(state): State<AppState>,
    Json(payload): Json<ResetConfirmRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .reset
        .commit(
            &payload.linkkey,
            &payload.email,
            &payload.password,
            &payload.password_confirm,
        )
        .await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

/// GET /settings/{name} - read a setting for the logged-in user
async fn get_setting(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = logged_session(&state, &headers).await?;
    let value = state.settings.get_str(session.user_id, &name).await?;
    Ok(Json(SettingResponse { name, value }))
}

/// PUT /settings/{name} - store a setting for the logged-in user
async fn put_setting(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(payload): Json<PutSettingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = logged_session(&state, &headers).await?;
    state
        .settings
        .set_str(session.user_id, &name, &payload.value)
        .await?;
    Ok(Json(SettingResponse {
        name,
        value: Some(payload.value),
    }))
}

/// POST /contact - submit a contact message, login optional
async fn submit_contact(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ContactRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // an anonymous sender is fine, the message is just unattributed
    let user_id = match logged_session(&state, &headers).await {
        Ok(session) => session.user_id,
        Err(_) => 0,
    };
    state
        .contact
        .submit(user_id, &payload.email, &payload.message)
        .await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

/// Resolve the logged cookie or fail with an expired session
async fn logged_session(state: &AppState, headers: &HeaderMap) -> Result<SessionInfo, ApiError> {
    let client = ClientInfo::from_headers(headers);
    let sesid = cookie_value(headers, LOGGED_COOKIE).ok_or(AuthError::ExpiredSession)?;
    Ok(state
        .auth
        .validate_session(&sesid, &client.uagent, &client.ip)
        .await?)
}
