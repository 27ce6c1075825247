use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config parse error: {0}")]
    ParseError(String),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("Invalid market data shift '{0}'")]
    InvalidShift(String),
}

impl ConfigError {
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}
