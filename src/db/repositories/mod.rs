//! Database repositories
//!
//! Repository pattern implementations for database access.
//! Each repository handles CRUD operations for a specific entity.

pub mod account;
pub mod contact;
pub mod login;
pub mod reset;
pub mod settings;

pub use account::{AccountRepository, SqlxAccountRepository};
pub use contact::{ContactRepository, SqlxContactRepository};
pub use login::{LoginRepository, SqlxLoginRepository};
pub use reset::{ResetTokenRepository, SqlxResetTokenRepository};
pub use settings::{SqlxUserSettingsRepository, UserSettingsRepository};
