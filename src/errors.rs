use crate::services::photo_service::{ErrorClass, PhotoError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// Numeric code for bad-input responses (ingest codes 1-3, validation codes 1-8).
    pub code: Option<u8>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            code: None,
        }
    }

    /// 400 carrying one of the public numeric codes.
    pub fn bad_input(code: Option<u8>, msg: impl Into<String>) -> Self {
        Self {
            code,
            ..Self::new(StatusCode::BAD_REQUEST, msg)
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.message,
            "status": self.status.as_u16()
        });
        if let Some(code) = self.code {
            body["code"] = json!(code);
        }

        (self.status, Json(body)).into_response()
    }
}

impl From<PhotoError> for AppError {
    fn from(err: PhotoError) -> Self {
        match err.class() {
            ErrorClass::BadInput(code) => AppError::bad_input(code, err.to_string()),
            ErrorClass::NotFound => AppError::not_found("photo not found"),
            ErrorClass::Conflict => AppError::new(StatusCode::CONFLICT, err.to_string()),
            ErrorClass::UpscaleNotAllowed => {
                AppError::new(StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
            }
            ErrorClass::Server => {
                tracing::error!(error = %err, "request failed");
                AppError::internal("internal server error")
            }
        }
    }
}
