//! Mapping of pipeline errors onto HTTP responses

use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use food_core::{Error, ErrorKind};
use serde::Serialize;
use tracing::error;

/// An error on its way to becoming an HTTP response
#[derive(Debug)]
pub struct ApiError(pub Error);

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: ErrorKind,
    detail: String,
}

/// HTTP status for each kind of failure
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::InvalidRequest | ErrorKind::InvalidImage => StatusCode::BAD_REQUEST,
        ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorKind::ModelNotReady => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::ShapeMismatch
        | ErrorKind::InferenceError
        | ErrorKind::LabelCountMismatch
        | ErrorKind::UnknownFailure => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    /// Multipart failures are the client's fault; an oversized body is 413
    pub fn from_multipart(err: MultipartError, body_limit: usize) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError(Error::BodyTooLarge { limit: body_limit })
        } else {
            ApiError(Error::InvalidRequest(err.body_text()))
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(kind);

        let detail = if kind == ErrorKind::UnknownFailure {
            error!("Unhandled failure: {}", self.0);
            "Internal server error".to_string()
        } else {
            self.0.to_string()
        };

        let body = ErrorBody {
            success: false,
            error: kind,
            detail,
        };
        (status, Json(body)).into_response()
    }
}
