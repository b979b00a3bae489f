//! Application state for the classification server
//!
//! Holds the immutable configuration and the inference pipeline, which in
//! turn owns the only `ModelGateway`.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use food_core::{InferencePipeline, ModelGateway, ServiceConfig};

/// Shared application state
pub struct AppState {
    /// Service configuration, fixed at startup
    pub config: ServiceConfig,
    /// Per-request orchestration
    pub pipeline: Arc<InferencePipeline>,
    /// Server start time
    pub started_at: Instant,
    /// Wall-clock start time, for `GET /`
    pub started_at_utc: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: ServiceConfig, pipeline: InferencePipeline) -> Self {
        Self {
            config,
            pipeline: Arc::new(pipeline),
            started_at: Instant::now(),
            started_at_utc: Utc::now(),
        }
    }

    pub fn gateway(&self) -> &Arc<ModelGateway> {
        self.pipeline.gateway()
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub type SharedState = Arc<AppState>;
