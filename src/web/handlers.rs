use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::broadcast::BroadcastState;
use crate::error::{AppError, Result};
use crate::recording::{Session, SessionState};
use crate::state::AppState;
use crate::stream::BOUNDARY;

// ============================================================================
// Health & Status
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct BroadcastStatus {
    pub state: BroadcastState,
    pub live_url: Option<String>,
    pub start_attempts: u32,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub session_state: SessionState,
    pub current_session: Option<Session>,
    pub last_session: Option<Session>,
    /// None in record-only mode
    pub broadcast: Option<BroadcastStatus>,
    /// Frames published to the relay since startup
    pub relay_frames: u64,
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        session_state: state.recorder.state(),
        current_session: state.recorder.current_session(),
        last_session: state.recorder.last_session(),
        broadcast: state.broadcast.as_ref().map(|b| BroadcastStatus {
            state: b.state(),
            live_url: b.live_url(),
            start_attempts: b.start_attempts(),
        }),
        relay_frames: state.relay.sequence(),
    })
}

// ============================================================================
// Frame relay
// ============================================================================

/// MJPEG stream of the annotated frames
///
/// Never completes on its own; the response ends when the client goes away.
pub async fn video_feed(State(state): State<Arc<AppState>>) -> Result<Response> {
    debug!("Relay viewer connected");
    let body_stream = state
        .relay
        .subscribe()
        .map(Ok::<bytes::Bytes, std::io::Error>);

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={}", BOUNDARY),
        )
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header(header::PRAGMA, "no-cache")
        .header(header::EXPIRES, "0")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(body_stream))
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// Single JPEG snapshot
pub async fn snapshot(State(state): State<Arc<AppState>>) -> Response {
    match state.relay.latest() {
        Some(frame) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "image/jpeg"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            frame.data,
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "No frame available").into_response(),
    }
}
