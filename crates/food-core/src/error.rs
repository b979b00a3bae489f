//! Error Handling Module
//!
//! Defines the error taxonomy of the inference pipeline.
//! Uses thiserror for ergonomic error definitions.

use serde::Serialize;
use thiserror::Error;

/// Main error type for classification operations
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or wrong API key
    #[error("Invalid or missing API key")]
    Unauthorized,

    /// Malformed request (no file, bad multipart body, too many files)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Bytes are not a supported image, or the declared type is not allowed
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Upload exceeds the configured size limit
    #[error("Payload too large: {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Request body exceeds the transport limit; its size is unknown
    #[error("Payload too large: request body exceeds the {limit} byte limit")]
    BodyTooLarge { limit: usize },

    /// Tensor or bitmap does not have the declared dimensions
    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    /// Model is not loaded and the last load attempt failed
    #[error("Model not ready: {0}")]
    ModelNotReady(String),

    /// The runtime rejected the input or produced unusable output
    #[error("Inference error: {0}")]
    Inference(String),

    /// Score vector width differs from the number of configured classes
    #[error("Label count mismatch: model produced {scores} scores for {labels} classes")]
    LabelCountMismatch { scores: usize, labels: usize },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

/// Stable, serialisable classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthorized,
    InvalidRequest,
    InvalidImage,
    PayloadTooLarge,
    ShapeMismatch,
    ModelNotReady,
    InferenceError,
    LabelCountMismatch,
    UnknownFailure,
}

impl ErrorKind {
    /// Whether the failure was caused by the caller rather than the service
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::Unauthorized
                | ErrorKind::InvalidRequest
                | ErrorKind::InvalidImage
                | ErrorKind::PayloadTooLarge
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::InvalidImage => "invalid_image",
            ErrorKind::PayloadTooLarge => "payload_too_large",
            ErrorKind::ShapeMismatch => "shape_mismatch",
            ErrorKind::ModelNotReady => "model_not_ready",
            ErrorKind::InferenceError => "inference_error",
            ErrorKind::LabelCountMismatch => "label_count_mismatch",
            ErrorKind::UnknownFailure => "unknown_failure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Unauthorized => ErrorKind::Unauthorized,
            Error::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Error::InvalidImage(_) => ErrorKind::InvalidImage,
            Error::PayloadTooLarge { .. } | Error::BodyTooLarge { .. } => ErrorKind::PayloadTooLarge,
            Error::ShapeMismatch { .. } => ErrorKind::ShapeMismatch,
            Error::ModelNotReady(_) => ErrorKind::ModelNotReady,
            Error::Inference(_) => ErrorKind::InferenceError,
            Error::LabelCountMismatch { .. } => ErrorKind::LabelCountMismatch,
            Error::Config(_) | Error::Io(_) | Error::Other(_) => ErrorKind::UnknownFailure,
        }
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::Limits(e) => Error::InvalidImage(format!("image exceeds decoder limits: {e}")),
            other => Error::InvalidImage(other.to_string()),
        }
    }
}

/// Convenience Result type for classification operations
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| Error::Other(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| Error::Other(format!("{}: {}", f(), e)))
    }
}
