//! Registry error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    /// Underlying blob read/write failure.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("artifact not found: {0}")]
    NotFound(String),

    /// The blob exists but fails container or checksum verification.
    #[error("artifact corrupt: {0}")]
    Corrupt(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

impl From<std::io::Error> for RegistryError {
    fn from(e: std::io::Error) -> Self {
        RegistryError::Storage(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for RegistryError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        RegistryError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for RegistryError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        RegistryError::Corrupt(format!("payload decode failed: {}", e))
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(e: serde_json::Error) -> Self {
        RegistryError::Serialization(e.to_string())
    }
}
