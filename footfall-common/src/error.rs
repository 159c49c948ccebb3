//! Common error types for footfall

use thiserror::Error;

/// Common result type for footfall operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the ingestion pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Degenerate calibration (both reference points share a pixel coordinate)
    #[error("Calibration error: {0}")]
    Calibration(String),

    /// Extracted value failed its sanity bounds; the whole batch is discarded
    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    /// Browser launch or download failure
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Page structure did not match expectations
    #[error("Parse error: {0}")]
    Parse(String),

    /// Chart image could not be decoded
    #[error("Image error: {0}")]
    Image(String),

    /// Pipeline invariant violated (logic defect, not retryable)
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// Downstream nowcast model failure
    #[error("Model error: {0}")]
    Model(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a retry on the next cycle could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Database(_)
                | Error::Io(_)
                | Error::Fetch(_)
                | Error::Parse(_)
                | Error::OutOfBounds(_)
                | Error::Model(_)
        )
    }
}
