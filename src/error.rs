//! Error types for filo.

use thiserror::Error;

/// Common error type for filo.
#[derive(Error, Debug)]
pub enum FiloError {
    /// Authentication error (bad credentials, duplicate username).
    #[error("authentication error: {0}")]
    Auth(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Database error.
    ///
    /// Wraps errors from the persistence backend; sqlx errors are
    /// converted automatically.
    #[error("database error: {0}")]
    Database(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// Conversion from sqlx errors
impl From<sqlx::Error> for FiloError {
    fn from(e: sqlx::Error) -> Self {
        FiloError::Database(e.to_string())
    }
}

/// Result type alias for filo operations.
pub type Result<T> = std::result::Result<T, FiloError>;
