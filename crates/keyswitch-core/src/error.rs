//! Error types for keyswitch-core

use thiserror::Error;

/// Result type alias for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Registry error types
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Registry is not loaded - call load() first")]
    NotLoaded,

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl RegistryError {
    /// Whether this error reports a missing key, name, or object
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
