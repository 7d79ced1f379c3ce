//! Shared error vocabulary for the ScopeView services

use thiserror::Error;

/// Result alias used throughout the db and storage layers
pub type Result<T> = std::result::Result<T, Error>;

/// Failures shared between the analysis service and its persistence
/// and storage layers
#[derive(Error, Debug)]
pub enum Error {
    /// Session, frame, finding, or summary persistence failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Frame store or export bundle I/O failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Service configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// A session, frame, or summary that should exist does not
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller-supplied value rejected before reaching the pipeline
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Anything that indicates a bug rather than bad input, such as an
    /// unparseable stored row
    #[error("Internal error: {0}")]
    Internal(String),
}
