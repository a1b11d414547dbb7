//! HTTP surface
//!
//! Mounts the feature routes under `/api/v1` next to the health probe and
//! wraps everything in the shared middleware stack.

pub mod response;

use axum::{response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use tower_http::compression::CompressionLayer;

use crate::{
    config::CorsConfig,
    features::{self, FeatureState},
    middleware,
};

/// Create the application router with all routes and middleware
pub fn create_router(state: FeatureState, cors: &CorsConfig) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", features::router(state))
        // Layers apply from innermost to outermost
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(cors))
}

async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
