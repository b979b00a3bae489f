//! Food Classification Server
//!
//! HTTP surface of the classifier: liveness, class listing, single and batch
//! prediction behind a pre-shared API key.

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use food_core::{GatewayOptions, InferencePipeline, ModelGateway, ModelLoader, ServiceConfig};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use crate::state::{AppState, SharedState};

/// Validate `config`, start the gateway per its load policy and assemble
/// the shared state
pub fn build_state(config: ServiceConfig, loader: Arc<dyn ModelLoader>) -> food_core::Result<SharedState> {
    config.validate()?;
    let gateway = ModelGateway::start(loader, GatewayOptions::from_config(&config))?;
    let pipeline = InferencePipeline::new(&config, Arc::new(gateway))?;
    Ok(Arc::new(AppState::new(config, pipeline)))
}

/// Build the router
pub fn router(state: SharedState) -> Router {
    let body_limit = state.config.max_request_bytes();
    let single_limit = state.config.max_single_request_bytes();

    let protected = Router::new()
        .route("/classes", get(routes::classes::list_classes))
        .route(
            "/predict",
            post(routes::predict::predict).layer(DefaultBodyLimit::max(single_limit)),
        )
        .route("/batch-predict", post(routes::predict::batch_predict))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/", get(routes::health::root))
        .route("/health", get(routes::health::health_check))
        .merge(protected)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
