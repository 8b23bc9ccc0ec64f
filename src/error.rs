//! Error types for the Backup Plan Operator

use thiserror::Error;

/// Result type alias using the operator's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Operator error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Object storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Combined producer/consumer failure of a streaming run. The source
    /// error is only captured if it arrives within the join grace window.
    #[error("Stream failed: source: {source}; destination: {destination}")]
    Stream {
        // `r#source` keeps thiserror from treating this String as the
        // error's source(); it is the same field name as `source`.
        r#source: String,
        destination: String,
    },

    /// Retention pass aborted; the destination is left over-retained
    #[error("Retention error: {0}")]
    Retention(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    /// Create a retention error
    pub fn retention(msg: impl Into<String>) -> Self {
        Error::Retention(msg.into())
    }
}

/// True if the error is a Kubernetes 404, the only error class used as
/// control flow (missing owned resources are recreated, missing plans stop
/// the reconcile).
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(api_err) if api_err.code == 404)
}
