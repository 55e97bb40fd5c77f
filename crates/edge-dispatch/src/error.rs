//! Dispatch error types.

use thiserror::Error;

/// Dispatch pipeline error type.
///
/// These never reach event callers; the pipeline logs them and turns them
/// into drop/advance decisions.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Persistence error
    #[error("Store error: {0}")]
    Store(#[from] edge_store::StoreError),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Endpoint URL could not be built
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Queued record could not be decoded
    #[error("Invalid record {id}: {reason}")]
    InvalidRecord { id: String, reason: String },

    /// Network failure without an HTTP response
    #[error("Network error: {0}")]
    Network(String),
}

/// Result type alias using DispatchError.
pub type DispatchResult<T> = Result<T, DispatchError>;
