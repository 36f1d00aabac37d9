use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use narration_core::NarrationError;
use serde::Serialize;
use thiserror::Error;

/// API Error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No narration is active")]
    NoActiveNarration,

    #[error("Narration was superseded by a newer card")]
    StaleNarration,

    #[error("Narration error: {0}")]
    Narration(#[from] NarrationError),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

/// Error response structure
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NoActiveNarration => (
                StatusCode::CONFLICT,
                "No narration is active".to_string(),
            ),
            ApiError::StaleNarration => (
                StatusCode::CONFLICT,
                "Narration was superseded by a newer card".to_string(),
            ),
            ApiError::Narration(e) => {
                let status = match &e {
                    NarrationError::EmptyContent => StatusCode::BAD_REQUEST,
                    NarrationError::Cancelled => StatusCode::CONFLICT,
                    NarrationError::Service { .. } => StatusCode::BAD_GATEWAY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    tracing::error!("Narration error: {}", e);
                }
                (status, e.to_string())
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}
