//! Error types for the Quotagate service.

use thiserror::Error;

/// Errors raised by a counter store backend.
///
/// These are unexpected failures and are kept apart from rate limit
/// rejections, which are ordinary [`Decision`](crate::ratelimit::Decision)s.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The networked backend failed or could not be reached
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The backend answered with something the store cannot interpret
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Main error type for Quotagate operations.
#[derive(Error, Debug)]
pub enum QuotagateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Counter storage errors
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Rules file parse errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for QuotagateError {
    fn from(err: config::ConfigError) -> Self {
        QuotagateError::Config(err.to_string())
    }
}

/// Result type alias for Quotagate operations.
pub type Result<T> = std::result::Result<T, QuotagateError>;
