//! Error types for the top-tagging fit workflow

use thiserror::Error;

/// Workflow error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error (unknown period, missing working point, incompatible
    /// tagger/merge-scenario combination, ...). Always raised before any I/O.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required input (nominal histogram, observed data) is absent
    #[error("Missing input: {0}")]
    MissingInput(String),

    /// Invalid histogram operation
    #[error("Histogram error: {0}")]
    Histogram(String),

    /// Unreadable text or fit output
    #[error("Parse error: {0}")]
    Parse(String),

    /// Internal consistency violation
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
