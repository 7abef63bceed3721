//! Error types for watchlog

use thiserror::Error;

/// Main error type for the watchlog library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage-layer invariant violation (missing insert id, absent row)
    #[error("storage error: {0}")]
    Storage(String),
}

/// Result type alias for watchlog
pub type Result<T> = std::result::Result<T, Error>;
