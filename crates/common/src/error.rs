//! Shared error type for the energy market

use thiserror::Error;

/// A market setting the engine cannot run with
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid market setting `{field}`: {reason}")]
    InvalidSetting { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid_setting(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            field,
            reason: reason.into(),
        }
    }

    /// Name of the offending setting
    pub fn field(&self) -> &'static str {
        match self {
            Self::InvalidSetting { field, .. } => field,
        }
    }
}
