//! Error types for keyswitch-b2

use thiserror::Error;

/// Result type alias for remote operations
pub type Result<T> = std::result::Result<T, B2Error>;

/// Remote storage error types
#[derive(Error, Debug)]
pub enum B2Error {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Authorization failed: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{operation} failed with HTTP {status}: {body}")]
    Remote {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("{0} was canceled")]
    Canceled(&'static str),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl B2Error {
    /// Whether the bucket or object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Remote { status: 404, .. }
        )
    }
}
