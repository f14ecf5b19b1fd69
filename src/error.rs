//! Error types for parapet.
//!
//! HTTP handlers render every failure as `{"success": false, "reason": ...}`
//! with the status code picked by kind: 400 malformed, 401 unauthorized or
//! logical rejection, 500 storage.

use thiserror::Error;

/// Result type alias for parapet operations.
pub type Result<T> = std::result::Result<T, Error>;

/// parapet error kinds.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Schedule error: {0}")]
    Schedule(String),

    #[error("Cloud sync error: {0}")]
    CloudSync(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// HTTP status code for this error when it reaches a handler boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Json(_) => 400,
            Error::Storage(_) | Error::Database(_) | Error::Io(_) | Error::Config(_) => 500,
            // Logical rejections, auth failures and missing entities all
            // surface as 401 on this API, matching the stable contract.
            _ => 401,
        }
    }

    /// The `reason` string exposed to external callers.
    ///
    /// Storage and database failures are collapsed to a generic message so
    /// SQL text and file paths never leak to workers or browsers.
    pub fn reason(&self) -> String {
        match self {
            Error::Storage(_) | Error::Database(_) | Error::Io(_) => {
                "A storage error occurred".to_string()
            }
            other => other.to_string(),
        }
    }
}
