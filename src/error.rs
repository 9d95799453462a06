//! YummyVerse error types

use thiserror::Error;

/// YummyVerse error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation targets an unknown record or an empty artifact slot
    #[error("Not found: {0}")]
    NotFound(String),

    /// Record id is not usable as a storage namespace
    #[error("Invalid record id: {0}")]
    InvalidId(String),

    /// Rejected payload (e.g. non-JSON params document)
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Notification delivery error
    #[error("Notification error: {0}")]
    Notification(String),
}

/// Result type alias for YummyVerse operations
pub type Result<T> = std::result::Result<T, Error>;
