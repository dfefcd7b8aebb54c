//! Error types for Tributary
//!
//! All errors in the engine are converted to `AppError`. The variants map
//! onto the failure classes the connector distinguishes: connection errors
//! (recorded on the Following), conversion errors (skip one item), storage
//! errors (abort the cycle), and authorization errors (reject outright).

use thiserror::Error;

/// Application-wide error type
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found
    #[error("Resource not found")]
    NotFound,

    /// Authentication required
    #[error("Authentication required")]
    Unauthorized,

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Remote source unreachable or unparsable
    ///
    /// Terminal for the connect cycle; the message is persisted on the
    /// Following record for operator visibility.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A single remote item could not be converted to a Message
    ///
    /// Never terminal: the item is skipped and the cycle continues.
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP client error
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Activity delivery error
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// True when the error should skip a single item rather than abort
    /// the surrounding ingest cycle.
    pub fn is_conversion(&self) -> bool {
        matches!(self, AppError::Conversion(_))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
