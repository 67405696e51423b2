//! Error types for maskfit-model.

use thiserror::Error;

/// Top-level error type for encoding, training, and prediction.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Empty dataset: {0}")]
    EmptyDataset(String),

    #[error("Single-class dataset: {0}")]
    SingleClass(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Prediction error: {0}")]
    Prediction(String),
}

/// Result type alias for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ModelError::EmptyDataset("no rows survived filtering".to_string());
        assert!(err.to_string().contains("no rows survived"));

        let err = ModelError::SingleClass("all labels are pass".to_string());
        assert!(err.to_string().contains("Single-class"));
    }
}
