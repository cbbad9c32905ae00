//! Error types for the Dokimi practice engine
//!
//! This module provides comprehensive error handling using thiserror for
//! structured error definitions and anyhow for error propagation.

use thiserror::Error;

/// Main error type for Dokimi operations
#[derive(Error, Debug)]
pub enum DokimiError {
    /// LLM API request failed
    #[error("LLM API error: {0}")]
    LlmApi(String),

    /// Requested entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Insert collided with an existing content hash
    #[error("Duplicate item: {0}")]
    Duplicate(String),

    /// Caller lacks the required role
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Invalid id format
    #[error("Invalid id: {0}")]
    InvalidId(#[from] uuid::Error),

    /// Invalid operation (e.g., claiming a job that is not queued)
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Input failed validation (e.g., justification too short)
    #[error("Validation error: {0}")]
    Validation(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Dokimi operations
pub type Result<T> = std::result::Result<T, DokimiError>;

/// Convert anyhow::Error to DokimiError
impl From<anyhow::Error> for DokimiError {
    fn from(err: anyhow::Error) -> Self {
        DokimiError::Other(err.to_string())
    }
}
