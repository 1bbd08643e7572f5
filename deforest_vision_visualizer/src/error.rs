//! HTTP error handling and response types.

use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use deforest_vision::VisionError;
use deforest_vision::narrative::NarrativeError;
use serde::{Deserialize, Serialize};

/// Body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(String),
    #[error(transparent)]
    Vision(#[from] VisionError),
    #[error(transparent)]
    Narrative(#[from] NarrativeError),
    #[error(transparent)]
    Multipart(#[from] MultipartError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, ApiError::new("NOT_FOUND", msg)),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ApiError::new("BAD_REQUEST", msg)),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::new("INTERNAL_ERROR", msg),
            ),
            AppError::Vision(e) => {
                let status = match e {
                    VisionError::ShapeMismatch { .. }
                    | VisionError::InsufficientInput { .. }
                    | VisionError::DecodeFailure { .. }
                    | VisionError::InvalidConfig { .. } => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, ApiError::new(e.code(), e.to_string()))
            }
            AppError::Narrative(NarrativeError::Unavailable) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ApiError::new("NARRATOR_UNAVAILABLE", NarrativeError::Unavailable.to_string()),
            ),
            AppError::Narrative(e @ NarrativeError::InvalidQuery { .. }) => {
                (StatusCode::BAD_REQUEST, ApiError::new("INVALID_QUERY", e.to_string()))
            }
            AppError::Narrative(e) => (StatusCode::BAD_GATEWAY, ApiError::new("NARRATOR_ERROR", e.to_string())),
            AppError::Multipart(e) => (e.status(), ApiError::new("MULTIPART_ERROR", e.body_text())),
        };

        (status, Json(error)).into_response()
    }
}
