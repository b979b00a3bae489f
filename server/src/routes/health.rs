//! Liveness endpoints; neither forces a model load

use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::SharedState;

#[derive(Serialize)]
pub struct RootResponse {
    pub message: String,
    pub description: String,
    pub version: String,
    pub model_ready: bool,
    pub available_classes: Vec<String>,
    pub started_at: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    pub uptime_seconds: u64,
}

/// GET / - Service information
pub async fn root(State(state): State<SharedState>) -> Json<RootResponse> {
    let service = &state.config.service;
    Json(RootResponse {
        message: service.title.clone(),
        description: service.description.clone(),
        version: service.version.clone(),
        model_ready: state.gateway().is_loaded(),
        available_classes: state.config.classes.clone(),
        started_at: state.started_at_utc.to_rfc3339(),
    })
}

/// GET /health - Health check endpoint
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        model_loaded: state.gateway().is_loaded(),
        uptime_seconds: state.uptime_seconds(),
    })
}
