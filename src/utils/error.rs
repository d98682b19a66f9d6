//! Error types shared across the relay.
//!
//! `RelayError` is what callers of the relay see. `BackendError` is what the
//! database boundary reports; the relay folds it into `Subscription` or
//! `Publish` depending on which operation failed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Missing or malformed input, rejected before touching the registry.
    #[error("{0}")]
    Validation(String),

    /// The upstream LISTEN could not be established.
    #[error("failed to subscribe to channel {channel}: {reason}")]
    Subscription { channel: String, reason: String },

    /// The upstream NOTIFY failed. The caller may retry.
    #[error("failed to publish to channel {channel}: {reason}")]
    Publish { channel: String, reason: String },

    #[error("decode error: {0}")]
    Decode(String),
}

impl RelayError {
    pub fn validation(message: impl Into<String>) -> Self {
        RelayError::Validation(message.into())
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::Decode(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}
