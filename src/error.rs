//! Error taxonomy shared by all authentication services.
//!
//! Validation and business-rule failures are typed so the API layer can
//! translate them for the user. Persistence failures are wrapped in
//! `Internal` and never leak driver details to the client.

use thiserror::Error;

/// Errors produced by the authentication and session services.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Malformed input (missing field, wrong shape)
    #[error("invalid request")]
    InvalidRequest,

    /// User-correctable validation failure (format, length, charset)
    #[error("{0}")]
    Validation(String),

    /// Never distinguishes unknown identity from wrong password
    #[error("invalid login and/or password")]
    InvalidCredentials,

    /// Brute-force cooldown is active for this account
    #[error("too many unsuccessful login attempts, please wait before trying again")]
    RateLimited,

    /// Session table is full
    #[error("no session slots available")]
    ResourceExhausted,

    /// Session unknown or past its age ceiling; the cookie should be cleared
    #[error("session expired")]
    ExpiredSession,

    /// Reset key has the wrong shape (truncated link)
    #[error("password-reset link is broken")]
    LinkBroken,

    /// Reset key unknown or older than its validity window
    #[error("password-reset link is invalid or may be expired")]
    LinkMayBeExpired,

    /// Honeypot field was filled in
    #[error("request rejected")]
    RobotDetected,

    /// Persistence or other infrastructure failure
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    /// Short machine-readable code for API responses and logs.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidRequest => "INVALID_REQUEST",
            AuthError::Validation(_) => "VALIDATION_FAILED",
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::RateLimited => "RATE_LIMITED",
            AuthError::ResourceExhausted => "RESOURCE_EXHAUSTED",
            AuthError::ExpiredSession => "EXPIRED_SESSION",
            AuthError::LinkBroken => "LINK_BROKEN",
            AuthError::LinkMayBeExpired => "LINK_MAY_BE_EXPIRED",
            AuthError::RobotDetected => "ROBOT_DETECTED",
            AuthError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
