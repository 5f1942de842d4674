//! API middleware and shared request plumbing
//!
//! Holds the application state, the JSON error envelope, cookie handling
//! and client-identity extraction used by every handler.

use axum::{
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use crate::config::Config;
use crate::error::AuthError;
use crate::services::{AuthService, ContactService, ResetService, UserSettingsService};

/// Cookie carrying a logged-in session id
pub const LOGGED_COOKIE: &str = "ls";
/// Cookie carrying an anonymous session id
pub const ANON_COOKIE: &str = "as";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub reset: Arc<ResetService>,
    pub settings: Arc<UserSettingsService>,
    pub contact: Arc<ContactService>,
    pub config: Arc<Config>,
}

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        if let AuthError::Internal(cause) = &err {
            error!("Internal error: {:#}", cause);
        }
        // Display never leaks internals, see AuthError
        ApiError::new(err.code(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.error.code.as_str() {
            "INVALID_REQUEST" | "ROBOT_DETECTED" => StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED" => StatusCode::UNPROCESSABLE_ENTITY,
            "INVALID_CREDENTIALS" | "EXPIRED_SESSION" => StatusCode::UNAUTHORIZED,
            "RATE_LIMITED" => StatusCode::TOO_MANY_REQUESTS,
            "RESOURCE_EXHAUSTED" => StatusCode::SERVICE_UNAVAILABLE,
            "LINK_BROKEN" | "LINK_MAY_BE_EXPIRED" => StatusCode::GONE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(self)).into_response()
    }
}

/// Client identity as seen by the session layer
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub uagent: String,
    pub ip: String,
}

impl ClientInfo {
    /// Extract user agent and IP from request headers.
    ///
    /// The user agent is truncated to the width of its storage column.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let uagent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .chars()
            .take(250)
            .collect();
        let ip = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .unwrap_or("unknown")
            .trim()
            .to_string();
        Self { uagent, ip }
    }
}

/// Read a cookie value from the Cookie header
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    for pair in cookies.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        if parts.next() == Some(name) {
            let value = parts.next()?;
            // "x" is the cleared-cookie sentinel
            if value.is_empty() || value == "x" {
                return None;
            }
            return Some(value.to_string());
        }
    }
    None
}

/// Build a Set-Cookie value for a session cookie.
///
/// `expires` of `None` makes a session cookie that dies with the browser.
pub fn session_cookie(name: &str, value: &str, expires: Option<DateTime<Utc>>) -> String {
    let mut cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", name, value);
    if let Some(at) = expires {
        cookie.push_str(&format!("; Expires={}", at.format("%a, %d %b %Y %H:%M:%S GMT")));
    }
    cookie
}

/// Build a Set-Cookie value that deletes a cookie.
///
/// The value is the sentinel "x" with an expiry far in the past, so even
/// clients that ignore the expiry stop presenting a usable id.
pub fn cleared_cookie(name: &str) -> String {
    let past = Utc
        .with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now);
    session_cookie(name, "x", Some(past))
}

/// Expiry for a remembered login cookie
pub fn remember_expiry(days: i64) -> DateTime<Utc> {
    Utc::now() + Duration::days(days)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_cookie_value_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("as=abc123; ls=def456; other=1"),
        );

        assert_eq!(cookie_value(&headers, "as").as_deref(), Some("abc123"));
        assert_eq!(cookie_value(&headers, "ls").as_deref(), Some("def456"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn test_cleared_sentinel_reads_as_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("ls=x"));
        assert_eq!(cookie_value(&headers, "ls"), None);
    }

    #[test]
    fn test_cleared_cookie_is_expired_sentinel() {
        let cookie = cleared_cookie("ls");
        assert!(cookie.starts_with("ls=x;"));
        assert!(cookie.contains("Expires=Sat, 01 Jan 2000"));
    }

    #[test]
    fn test_session_cookie_without_expiry() {
        let cookie = session_cookie("as", "abc", None);
        assert_eq!(cookie, "as=abc; Path=/; HttpOnly; SameSite=Lax");
    }

    #[test]
    fn test_client_info_truncates_user_agent() {
        let mut headers = HeaderMap::new();
        let long = "a".repeat(400);
        headers.insert(header::USER_AGENT, HeaderValue::from_str(&long).unwrap());
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );

        let info = ClientInfo::from_headers(&headers);
        assert_eq!(info.uagent.len(), 250);
        assert_eq!(info.ip, "203.0.113.9");
    }
}
