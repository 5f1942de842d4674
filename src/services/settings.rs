//! Per-user settings
//!
//! String and numeric settings keyed by name. Numbers share the string
//! column and are stored as decimal text.

use crate::db::repositories::UserSettingsRepository;
use crate::error::AuthError;
use std::sync::Arc;

/// Maximum setting-name length, matches the column width
const MAX_NAME_LEN: usize = 30;

/// Per-user settings service
pub struct UserSettingsService {
    settings: Arc<dyn UserSettingsRepository>,
}

impl UserSettingsService {
    pub fn new(settings: Arc<dyn UserSettingsRepository>) -> Self {
        Self { settings }
    }

    /// Store a string setting, replacing any previous value
    pub async fn set_str(&self, user_id: i64, name: &str, value: &str) -> Result<(), AuthError> {
        validate_name(name)?;
        self.settings.set(user_id, name, value).await?;
        Ok(())
    }

    /// Read a string setting, `None` when never set
    pub async fn get_str(&self, user_id: i64, name: &str) -> Result<Option<String>, AuthError> {
        validate_name(name)?;
        Ok(self.settings.get(user_id, name).await?)
    }

    /// Store a numeric setting
    pub async fn set_num(&self, user_id: i64, name: &str, value: i64) -> Result<(), AuthError> {
        self.set_str(user_id, name, &value.to_string()).await
    }

    /// Read a numeric setting, `None` when never set
    pub async fn get_num(&self, user_id: i64, name: &str) -> Result<Option<i64>, AuthError> {
        match self.get_str(user_id, name).await? {
            None => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| AuthError::Validation("setting is not a number".to_string())),
        }
    }
}

fn validate_name(name: &str) -> Result<(), AuthError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(AuthError::InvalidRequest);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(AuthError::InvalidRequest);
    }
    Ok(())
}
