//! Error handling for the HTTP surface.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::utils::RelayError;

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    /// Required field missing or invalid.
    BadRequest(String),
    /// The relay failed to carry out the request.
    Relay {
        context: &'static str,
        source: RelayError,
    },
}

/// Error response body.
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl AppError {
    /// Wrap a relay failure, keeping validation problems as 400s.
    pub fn relay(context: &'static str, source: RelayError) -> Self {
        match source {
            RelayError::Validation(message) => AppError::BadRequest(message),
            source => AppError::Relay { context, source },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: message,
                    details: None,
                },
            ),
            AppError::Relay { context, source } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    error: context.to_string(),
                    details: Some(source.to_string()),
                },
            ),
        };

        (status, Json(body)).into_response()
    }
}
