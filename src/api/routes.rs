//! API route definitions.

use axum::Router;
use axum::routing::{any, get, post};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::create;
use super::handlers;
use super::proxy;
use super::state::AppState;
use super::tunnel;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG));

    Router::new()
        // Session lifecycle
        .route("/wd/hub/session", post(create::create_session))
        .route("/wd/hub/session/{id}", any(proxy::route_session))
        .route("/wd/hub/session/{id}/{*rest}", any(proxy::route_session))
        // Per-session websocket tunnels
        .route("/vnc/{id}", get(tunnel::vnc_tunnel))
        .route("/logs/{id}", get(tunnel::log_tunnel))
        // Introspection
        .route("/status", get(handlers::status))
        .route("/ping", get(handlers::ping))
        .route("/error", any(handlers::invalid_session))
        .layer(trace_layer)
        .with_state(state)
}
