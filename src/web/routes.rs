use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use crate::state::AppState;

/// Create the relay router
///
/// The stream is served at the configured relay path (`/video_feed` by
/// default) because the broadcaster's browser source points there.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let relay_path = normalize_path(&state.config.get().relay.path);

    let stream_routes = Router::new()
        .route(&relay_path, get(handlers::video_feed))
        .route("/snapshot", get(handlers::snapshot));

    let status_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/status", get(handlers::status));

    Router::new()
        .merge(stream_routes)
        .merge(status_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/video_feed".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}
