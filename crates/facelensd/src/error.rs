use crate::engine::EngineError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use facelens_core::EnrollError;
use serde_json::json;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, ApiError>;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    /// An extractor refused the request; keeps axum's status.
    #[error("{1}")]
    Rejected(StatusCode, String),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Enroll(#[from] EnrollError),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Status code and the message placed in the `error` field.
    pub fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::Rejected(status, msg) => (*status, msg.clone()),
            Self::Engine(EngineError::Pipeline(e)) if e.is_bad_request() => {
                (StatusCode::BAD_REQUEST, e.to_string())
            }
            Self::Engine(e @ EngineError::Timeout(_)) => (StatusCode::GATEWAY_TIMEOUT, e.to_string()),
            Self::Enroll(e) if e.is_bad_request() => (StatusCode::BAD_REQUEST, e.to_string()),
            Self::Enroll(EnrollError::StoreFailed) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to save face.".to_string())
            }
            other => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Server error: {other}"),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = ?self, "request failed");
        } else {
            tracing::warn!(status = status.as_u16(), error = %message, "request rejected");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}
