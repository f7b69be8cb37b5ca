//! Error types for the catalog sync system.

use thiserror::Error;

/// Unified error type for domain-level operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unknown store id
    #[error("Unknown store: {0}")]
    UnknownStore(u32),

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::Config("missing stores".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing stores");

        let err = SyncError::UnknownStore(7);
        assert_eq!(err.to_string(), "Unknown store: 7");
    }
}
