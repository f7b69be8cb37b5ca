//! Remote connector error types.

use thiserror::Error;

/// Errors raised by the search engine connector.
///
/// `Transient` and `RateLimited` are worth retrying; everything else
/// points at configuration, credentials or a malformed request.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Network failure or 5xx from the engine
    #[error("Transient remote error: {0}")]
    Transient(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    /// 401/403 from the engine
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Index not found: {0}")]
    NotFound(String),

    /// Any other 4xx
    #[error("Request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RemoteError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_) | RemoteError::RateLimited)
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        RemoteError::Serialization(err.to_string())
    }
}
