//! Domain models
//!
//! Entities shared by the services and the database layer.

pub mod account;
pub mod contact;
pub mod login_record;

pub use account::Account;
pub use contact::ContactMessage;
pub use login_record::{LoginRecord, ResetToken};
