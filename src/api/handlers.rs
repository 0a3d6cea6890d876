//! Status, ping and error-route handlers.

use std::collections::HashMap;

use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use super::error::ProxyError;
use super::state::AppState;

/// Live sessions grouped browser → version → quota → count.
type BrowserStats = HashMap<String, HashMap<String, HashMap<String, usize>>>;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub total: usize,
    pub used: usize,
    pub queued: usize,
    pub browsers: BrowserStats,
}

/// `GET /status` — capacity, queue counters and the per-browser breakdown.
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let queue = state.queue.snapshot();
    let mut browsers: BrowserStats = HashMap::new();
    for (_, session) in state.sessions.snapshot() {
        *browsers
            .entry(session.browser.clone())
            .or_default()
            .entry(session.version.clone())
            .or_default()
            .entry(session.quota.clone())
            .or_default() += 1;
    }
    Json(StatusResponse {
        total: queue.total,
        used: queue.used,
        queued: queue.queued,
        browsers,
    })
}

#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub uptime: String,
    pub version: String,
}

/// `GET /ping` — liveness probe.
pub async fn ping(State(state): State<AppState>) -> Json<PingResponse> {
    Json(PingResponse {
        uptime: format!("{:?}", state.uptime()),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// The `/error` route and the router's miss path share this response.
pub fn invalid_session_response() -> Response {
    ProxyError::InvalidSession.into_response()
}

/// `ANY /error`.
pub async fn invalid_session() -> Response {
    invalid_session_response()
}
