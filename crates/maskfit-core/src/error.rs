//! Error types for maskfit-core.

use thiserror::Error;

/// Top-level error type for maskfit-core.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Dataset error: {0}")]
    DatasetError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        CoreError::ConfigError(err.to_string())
    }
}

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::DatasetError("no record list found".to_string());
        assert!(err.to_string().contains("no record list found"));
    }

    #[test]
    fn test_serde_json_conversion() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: CoreError = parse_err.into();
        assert!(matches!(err, CoreError::SerializationError(_)));
    }
}
