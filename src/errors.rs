use crate::services::ServiceError;
use crate::store::BlobError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for handler errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
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
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let status = match &err {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ServiceError::Oversize { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ServiceError::Blob(blob) => blob_status(blob),
            ServiceError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, err.to_string())
    }
}

fn blob_status(err: &BlobError) -> StatusCode {
    match err {
        BlobError::NotFound(_) | BlobError::UploadNotFound(_) => StatusCode::NOT_FOUND,
        BlobError::InvalidKey | BlobError::InvalidUploadId | BlobError::PartMismatch { .. } => {
            StatusCode::BAD_REQUEST
        }
        BlobError::RangeUnsupported | BlobError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
