//! Service-level error taxonomy.
//!
//! Every failure that can cross the dispatcher boundary maps onto one of
//! these variants, and each variant owns its HTTP-style status code: bad
//! envelopes are the caller's fault (400), everything else is ours (500).
//! Imputation gaps are deliberately absent: an unresolved value is recorded
//! as provenance and the entity is excluded, never surfaced as an error.

use thiserror::Error;

use maskfit_core::error::CoreError;
use maskfit_model::ModelError;
use maskfit_registry::RegistryError;

#[derive(Error, Debug)]
pub enum ServiceError {
    /// Malformed request envelope or a missing required field.
    #[error("invalid request: {0}")]
    Input(String),

    /// The dataset cannot support the requested operation (empty after
    /// filtering, single-class, and so on).
    #[error("data error: {0}")]
    Data(String),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    /// Status code for the response envelope.
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Input(_) => 400,
            ServiceError::Data(_)
            | ServiceError::Registry(_)
            | ServiceError::Model(_)
            | ServiceError::Internal(_) => 500,
        }
    }
}

impl From<CoreError> for ServiceError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::DatasetError(msg) => ServiceError::Data(msg),
            CoreError::ConfigError(msg) | CoreError::SerializationError(msg) => {
                ServiceError::Internal(msg)
            }
        }
    }
}
