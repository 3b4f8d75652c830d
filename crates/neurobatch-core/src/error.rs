//! Error types for `neurobatch` core library.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using `neurobatch` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `neurobatch` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The data root does not exist or is not a directory
    #[error("Data root is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
