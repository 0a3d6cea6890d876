//! Session creation: admission, environment provisioning, and the
//! creation handshake against the freshly started environment.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Method, Request, header};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::caps::{NewSessionRequest, normalize_resolution};
use crate::queue::AdmissionQueue;
use crate::service::{CancelFn, StartedEnvironment};
use crate::session::{Session, SessionState};

use super::error::ProxyError;
use super::proxy::{MAX_BODY_BYTES, arm_expiry, clean_join};
use super::state::AppState;

/// Session id as it appears in an upstream creation response body, either at
/// the top level or nested under `value`. The top-level field wins.
#[derive(Debug, Default, Deserialize)]
struct SessionIdEnvelope {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    #[serde(default)]
    value: NestedSessionId,
}

#[derive(Debug, Default, Deserialize)]
struct NestedSessionId {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

impl SessionIdEnvelope {
    fn id(self) -> Option<String> {
        self.session_id
            .or(self.value.session_id)
            .filter(|id| !id.is_empty())
    }
}

/// Balances the admission counters and the environment's cancel action
/// against every way a creation attempt can end.
///
/// The handler future is dropped when the client disconnects, so `Drop` is
/// the abandonment path: it drops the queued request and cancels the
/// environment if one was started. Explicit error responses mark the guard
/// as responded first; a completed creation defuses it entirely.
struct CreationGuard {
    queue: Arc<AdmissionQueue>,
    serial: u64,
    quota: String,
    cancel: Option<CancelFn>,
    responded: bool,
    done: bool,
}

impl CreationGuard {
    fn new(queue: Arc<AdmissionQueue>, serial: u64, quota: String) -> Self {
        Self {
            queue,
            serial,
            quota,
            cancel: None,
            responded: false,
            done: false,
        }
    }

    fn arm_cancel(&mut self, cancel: CancelFn) {
        self.cancel = Some(cancel);
    }

    fn take_cancel(&mut self) -> Option<CancelFn> {
        self.cancel.take()
    }

    /// Fail the creation: the guard's drop balances the queue and cancels
    /// any started environment.
    fn reject(&mut self, err: ProxyError) -> Response {
        self.responded = true;
        err.into_response()
    }

    fn complete(&mut self) {
        self.done = true;
    }
}

impl Drop for CreationGuard {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        self.queue.drop_one();
        if let Some(cancel) = self.cancel.take() {
            tokio::spawn(cancel());
        }
        if !self.responded {
            info!(
                serial = self.serial,
                quota = %self.quota,
                "client disconnected during session creation"
            );
        }
    }
}

/// Handle `POST /wd/hub/session`.
pub async fn create_session(State(state): State<AppState>, req: Request<Body>) -> Response {
    let started_at = Instant::now();
    let serial = state.next_serial();
    let quota = basic_auth_user(req.headers()).unwrap_or_else(|| "unknown".to_string());

    state.queue.push();
    let mut guard = CreationGuard::new(state.queue.clone(), serial, quota.clone());

    // The body is buffered once so it can be replayed on every attempt.
    let body = match axum::body::to_bytes(req.into_body(), MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(err) => {
            warn!(serial, quota = %quota, error = %err, "error reading request");
            return guard.reject(ProxyError::bad_request(err.to_string()));
        }
    };

    let request: NewSessionRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            warn!(serial, quota = %quota, error = %err, "bad json format");
            return guard.reject(ProxyError::bad_request(err.to_string()));
        }
    };
    let caps = request.caps;

    let screen = match normalize_resolution(&caps.screen_resolution) {
        Ok(screen) => screen,
        Err(err) => {
            warn!(serial, quota = %quota, input = %caps.screen_resolution, "bad screen resolution");
            return guard.reject(ProxyError::bad_request(err.to_string()));
        }
    };

    let mut version = caps.version.clone();
    let Some(starter) = state
        .manager
        .find(&caps.name, &mut version, &screen, caps.vnc, serial)
    else {
        warn!(
            serial,
            quota = %quota,
            browser = %caps.name,
            version = %caps.version,
            "environment not available"
        );
        return guard.reject(ProxyError::bad_request(
            "Requested environment is not available",
        ));
    };

    let StartedEnvironment {
        mut upstream,
        container,
        vnc,
        cancel,
    } = match starter.start_with_cancel().await {
        Ok(started) => started,
        Err(err) => {
            error!(serial, quota = %quota, error = %err, "environment startup failed");
            return guard.reject(ProxyError::internal(err.to_string()));
        }
    };
    guard.arm_cancel(cancel);

    // Creation handshake. Attempts are bounded individually, not in number:
    // the client decides how long the whole exchange may take.
    let mut attempt: u32 = 1;
    let upstream_response = loop {
        let target = match upstream.uri(&clean_join(&upstream.path, "/session")) {
            Ok(target) => target,
            Err(err) => return guard.reject(ProxyError::internal(err.to_string())),
        };
        let attempt_req = match Request::builder()
            .method(Method::POST)
            .uri(target)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.clone()))
        {
            Ok(attempt_req) => attempt_req,
            Err(err) => return guard.reject(ProxyError::internal(err.to_string())),
        };

        info!(serial, quota = %quota, upstream = %upstream, attempt, "session attempted");
        match tokio::time::timeout(
            state.config.session_attempt_timeout,
            state.http_client.request(attempt_req),
        )
        .await
        {
            Err(_elapsed) => {
                warn!(serial, quota = %quota, attempt, "session attempt timed out");
                attempt += 1;
            }
            Ok(Err(err)) => {
                error!(serial, quota = %quota, upstream = %upstream, error = %err, "session failed");
                return guard.reject(ProxyError::internal(err.to_string()));
            }
            Ok(Ok(response)) => {
                // Environments exposing the protocol under a prefix answer
                // 404 at the root; switch to /wd/hub and try again.
                if response.status() == axum::http::StatusCode::NOT_FOUND
                    && upstream.path.is_empty()
                {
                    upstream.path = "/wd/hub".to_string();
                    attempt += 1;
                    continue;
                }
                break response;
            }
        }
    };

    let status = upstream_response.status();
    let location = upstream_response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let content_type = upstream_response.headers().get(header::CONTENT_TYPE).cloned();

    let (session_id, client_response) = if let Some(location) = location {
        let session_id = location
            .parse::<axum::http::Uri>()
            .ok()
            .and_then(|uri| uri.path().rsplit('/').next().map(str::to_string))
            .unwrap_or_default();
        let rewritten = format!(
            "http://{}/wd/hub/session/{session_id}",
            state.config.hostname
        );
        let response = Response::builder()
            .status(status)
            .header(header::LOCATION, rewritten)
            .body(Body::empty())
            .unwrap_or_default();
        (session_id, response)
    } else {
        let relay = Body::new(upstream_response.into_body());
        let bytes = match axum::body::to_bytes(relay, MAX_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(serial, quota = %quota, error = %err, "error reading upstream response");
                return guard.reject(ProxyError::bad_gateway(err.to_string()));
            }
        };
        let session_id = serde_json::from_slice::<SessionIdEnvelope>(&bytes)
            .ok()
            .and_then(SessionIdEnvelope::id)
            .unwrap_or_default();
        let mut builder = Response::builder().status(status);
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        let response = builder.body(Body::from(bytes)).unwrap_or_default();
        (session_id, response)
    };

    if session_id.is_empty() {
        error!(
            serial,
            quota = %quota,
            upstream = %upstream,
            status = %status,
            "no session id in upstream response"
        );
        return guard.reject(ProxyError::bad_gateway(
            "protocol error: could not determine session id",
        ));
    }

    // Register before responding so the client's first follow-up call cannot
    // outrun the registry entry.
    let cancel = guard.take_cancel();
    let timer = arm_expiry(state.clone(), session_id.clone());
    let session = Arc::new(Session {
        quota: quota.clone(),
        browser: caps.name.clone(),
        version,
        screen,
        upstream: upstream.clone(),
        container,
        vnc,
        state: tokio::sync::Mutex::new(SessionState {
            timer: Some(timer),
            cancel,
        }),
    });
    state.sessions.put(session_id.clone(), session);
    state.queue.create();
    guard.complete();

    info!(
        serial,
        quota = %quota,
        session = %session_id,
        upstream = %upstream,
        attempts = attempt,
        elapsed = ?started_at.elapsed(),
        "session created"
    );
    client_response
}

fn basic_auth_user(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let user = decoded.split(':').next()?.to_string();
    (!user.is_empty()).then_some(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_auth(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn basic_auth_extracts_the_user() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("tenant:secret");
        let headers = headers_with_auth(&format!("Basic {encoded}"));
        assert_eq!(basic_auth_user(&headers), Some("tenant".to_string()));
    }

    #[test]
    fn missing_or_malformed_auth_is_none() {
        assert_eq!(basic_auth_user(&HeaderMap::new()), None);
        assert_eq!(basic_auth_user(&headers_with_auth("Bearer token")), None);
        assert_eq!(basic_auth_user(&headers_with_auth("Basic !!!")), None);
    }

    #[test]
    fn top_level_session_id_wins_over_nested() {
        let envelope: SessionIdEnvelope = serde_json::from_str(
            r#"{"sessionId":"outer","value":{"sessionId":"inner"}}"#,
        )
        .unwrap();
        assert_eq!(envelope.id(), Some("outer".to_string()));
    }

    #[test]
    fn nested_session_id_is_recognized() {
        let envelope: SessionIdEnvelope =
            serde_json::from_str(r#"{"value":{"sessionId":"inner"}}"#).unwrap();
        assert_eq!(envelope.id(), Some("inner".to_string()));
    }

    #[test]
    fn absent_session_id_is_none() {
        let envelope: SessionIdEnvelope = serde_json::from_str(r#"{"value":{}}"#).unwrap();
        assert_eq!(envelope.id(), None);
    }
}
