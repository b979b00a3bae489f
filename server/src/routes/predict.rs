//! Prediction endpoints
//!
//! Multipart bodies are read here; everything after that runs on a blocking
//! worker thread, since decoding and inference are CPU-bound.

use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    Json,
};
use food_core::{BatchOutcome, ClassificationResult, Error, RawUpload};
use serde::Serialize;
use tracing::{info, info_span, Instrument, Span};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::SharedState;

/// Response of `POST /predict`
#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub success: bool,
    pub prediction: ClassificationResult,
    pub filename: Option<String>,
}

/// POST /predict - Classify one image (multipart field `file`)
pub async fn predict(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<Json<PredictResponse>, ApiError> {
    let span = info_span!("predict", request_id = %Uuid::new_v4());
    predict_one(state, multipart).instrument(span).await
}

async fn predict_one(state: SharedState, multipart: Multipart) -> Result<Json<PredictResponse>, ApiError> {
    let body_limit = state.config.max_single_request_bytes();
    let mut uploads = read_uploads(multipart, &["file"], 1, body_limit).await?;
    let upload = uploads
        .pop()
        .ok_or_else(|| Error::InvalidRequest("No file uploaded (expected field 'file')".to_string()))?;

    info!("Predicting {} ({} bytes)", upload.display_name(), upload.bytes.len());
    let filename = upload.filename.clone();
    let pipeline = Arc::clone(&state.pipeline);
    let span = Span::current();
    let prediction = tokio::task::spawn_blocking(move || span.in_scope(|| pipeline.classify(&upload)))
        .await
        .map_err(|e| Error::Other(format!("prediction task failed: {e}")))??;

    Ok(Json(PredictResponse {
        success: true,
        prediction,
        filename,
    }))
}

/// POST /batch-predict - Classify several images (multipart fields `files`)
pub async fn batch_predict(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<Json<BatchOutcome>, ApiError> {
    let span = info_span!("batch_predict", request_id = %Uuid::new_v4());
    predict_many(state, multipart).instrument(span).await
}

async fn predict_many(state: SharedState, multipart: Multipart) -> Result<Json<BatchOutcome>, ApiError> {
    let body_limit = state.config.max_request_bytes();
    let max_files = state.config.limits.max_batch_files;
    let uploads = read_uploads(multipart, &["files", "file"], max_files, body_limit).await?;
    if uploads.is_empty() {
        return Err(Error::InvalidRequest("No files uploaded (expected field 'files')".to_string()).into());
    }

    info!("Batch of {} files", uploads.len());
    let pipeline = Arc::clone(&state.pipeline);
    let span = Span::current();
    let outcome = tokio::task::spawn_blocking(move || span.in_scope(|| pipeline.classify_batch(&uploads)))
        .await
        .map_err(|e| Error::Other(format!("batch task failed: {e}")))?;

    info!(
        "Batch finished: {}/{} succeeded",
        outcome.successful_predictions, outcome.total_files
    );
    Ok(Json(outcome))
}

/// Collect file fields named in `field_names`, other fields are skipped
async fn read_uploads(
    mut multipart: Multipart,
    field_names: &[&str],
    max_files: usize,
    body_limit: usize,
) -> Result<Vec<RawUpload>, ApiError> {
    let mut uploads = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::from_multipart(e, body_limit))?
    {
        let wanted = matches!(field.name(), Some(name) if field_names.iter().any(|n| *n == name));
        if !wanted {
            continue;
        }
        if uploads.len() == max_files {
            return Err(Error::InvalidRequest(format!(
                "Too many files: at most {} accepted per request",
                max_files
            ))
            .into());
        }

        let filename = field.file_name().map(str::to_owned);
        let content_type = field.content_type().map(str::to_owned);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::from_multipart(e, body_limit))?;

        uploads.push(RawUpload {
            bytes: bytes.to_vec(),
            filename,
            content_type,
        });
    }

    Ok(uploads)
}
