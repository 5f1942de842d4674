//! Business logic services
//!
//! Services own the authentication rules and sit between the API layer
//! and the repositories.

pub mod auth;
pub mod contact;
pub mod email;
pub mod hasher;
pub mod reset;
pub mod settings;

pub use auth::{AccountUpdate, AuthService, LoginOutcome, NewAccount, SessionInfo, UpdateOutcome};
pub use contact::ContactService;
pub use email::{DynMailer, Mailer, SmtpMailer};
pub use reset::ResetService;
pub use settings::UserSettingsService;
