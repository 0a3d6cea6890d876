//! Reverse proxying of established-session traffic.
//!
//! Every call on `/wd/hub/session/<id>…` is rewritten onto the owning
//! environment. A hit refreshes the idle timer; a DELETE on the session root
//! tears the session down after the upstream response has been received.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, Request, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use tracing::{info, warn};

use crate::service::CancelFn;
use crate::session::{Session, TimerHandle, schedule};

use super::error::ProxyError;
use super::handlers::invalid_session_response;
use super::state::AppState;

/// Largest creation/relay body the proxy will buffer.
pub(crate) const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Handle any request addressed to an existing session.
pub async fn route_session(State(state): State<AppState>, req: Request<Body>) -> Response {
    // "/wd/hub/session/<id>[/…]" — the id is the third segment once the
    // mount prefix is stripped.
    let path = req.uri().path().to_string();
    let suffix = path.strip_prefix("/wd/hub").unwrap_or(&path).to_string();
    let fragments: Vec<&str> = suffix.split('/').collect();
    let Some(id) = fragments.get(2).filter(|id| !id.is_empty()).map(|id| id.to_string()) else {
        return invalid_session_response();
    };

    let Some(session) = state.sessions.get(&id) else {
        warn!(session = %id, "session not found");
        return invalid_session_response();
    };

    let target = {
        let mut path_and_query = clean_join(&session.upstream.path, &suffix);
        if let Some(query) = req.uri().query() {
            path_and_query.push('?');
            path_and_query.push_str(query);
        }
        match session.upstream.uri(&path_and_query) {
            Ok(uri) => uri,
            Err(err) => return ProxyError::internal(err.to_string()).into_response(),
        }
    };

    // The per-session lock serializes timer replacement against concurrent
    // requests and against DELETE-driven teardown.
    let teardown: Option<CancelFn> = {
        let mut st = session.state.lock().await;
        // Disarm the pending expiry; dropping the handle cancels it.
        st.timer.take();
        if req.method() == &Method::DELETE && fragments.len() == 3 {
            // Only the caller that wins the removal owns the teardown; a
            // racing delete (e.g. idle expiry) finds the registry empty.
            if state.sessions.remove(&id).is_some() {
                state.queue.release();
                info!(session = %id, "session deleted");
                st.cancel.take()
            } else {
                None
            }
        } else {
            st.timer = Some(arm_expiry(state.clone(), id.clone()));
            None
        }
    };

    match forward(&state, req, target).await {
        Ok(response) => {
            if let Some(cancel) = teardown {
                // Relay the upstream's DELETE response in full, then tear the
                // environment down off the request path.
                let response = match buffer_response(response).await {
                    Ok(response) => response,
                    Err(err) => err.into_response(),
                };
                tokio::spawn(cancel());
                response
            } else {
                response
            }
        }
        Err(err) => {
            if let Some(cancel) = teardown {
                tokio::spawn(cancel());
            }
            err.into_response()
        }
    }
}

/// Forward a request to the given URI with the shared client.
pub(crate) async fn forward(
    state: &AppState,
    req: Request<Body>,
    uri: Uri,
) -> Result<Response, ProxyError> {
    let (parts, body) = req.into_parts();

    let mut forwarded = Request::builder()
        .method(parts.method)
        .uri(uri)
        .version(parts.version)
        .body(body)
        .map_err(|err| ProxyError::internal(err.to_string()))?;
    *forwarded.headers_mut() = parts.headers;

    if let Some(authority) = forwarded.uri().authority().cloned() {
        let value = header::HeaderValue::from_str(authority.as_str())
            .map_err(|err| ProxyError::internal(err.to_string()))?;
        forwarded.headers_mut().insert(header::HOST, value);
    }

    let response = state
        .http_client
        .request(forwarded)
        .await
        .map_err(|err| ProxyError::bad_gateway(err.to_string()))?;

    let (parts, body) = response.into_parts();
    Ok(Response::from_parts(parts, Body::new(body)))
}

async fn buffer_response(response: Response) -> Result<Response, ProxyError> {
    let (parts, body) = response.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|err| ProxyError::bad_gateway(err.to_string()))?;
    Ok(Response::from_parts(parts, Body::from(bytes)))
}

/// Arm the idle timer for a session.
pub(crate) fn arm_expiry(state: AppState, id: String) -> TimerHandle {
    let delay = state.config.session_timeout;
    schedule(delay, move || expire_session(state, id))
}

/// Idle-timer action: delete the session through the proxy's own router so
/// expiry and client deletion share one teardown path. If that round-trip
/// fails the session is torn down directly rather than orphaned.
pub(crate) async fn expire_session(state: AppState, id: String) {
    info!(session = %id, "session timed out");
    if !self_delete(&state, &id).await {
        force_teardown(&state, &id).await;
    }
}

async fn self_delete(state: &AppState, id: &str) -> bool {
    let Some(addr) = state.local_addr() else {
        return false;
    };
    let uri = format!("http://127.0.0.1:{}/wd/hub/session/{id}", addr.port());
    let request = match Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .body(Body::empty())
    {
        Ok(request) => request,
        Err(_) => return false,
    };
    match tokio::time::timeout(
        state.config.session_delete_timeout,
        state.http_client.request(request),
    )
    .await
    {
        Ok(Ok(response)) if response.status() == StatusCode::OK => true,
        Ok(Ok(response)) => {
            warn!(session = %id, status = %response.status(), "timeout delete failed");
            false
        }
        Ok(Err(err)) => {
            warn!(session = %id, error = %err, "timeout delete failed");
            false
        }
        Err(_) => {
            warn!(session = %id, "timeout delete timed out");
            false
        }
    }
}

/// Remove a session and cancel its environment without an upstream exchange.
pub(crate) async fn force_teardown(state: &AppState, id: &str) {
    let Some(session) = state.sessions.remove(id) else {
        return;
    };
    state.queue.release();
    let cancel = take_cancel(&session).await;
    if let Some(cancel) = cancel {
        cancel().await;
    }
    warn!(session = %id, "session torn down without upstream delete");
}

async fn take_cancel(session: &Session) -> Option<CancelFn> {
    let mut st = session.state.lock().await;
    st.timer.take();
    st.cancel.take()
}

/// Join an upstream path prefix with a request path, normalizing `//`, `.`
/// and `..` the way the upstream expects a clean absolute path.
pub fn clean_join(base: &str, path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in base.split('/').chain(path.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }
    format!("/{}", segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_join_with_empty_base() {
        assert_eq!(clean_join("", "/session"), "/session");
        assert_eq!(clean_join("", "/session/abc/url"), "/session/abc/url");
    }

    #[test]
    fn clean_join_with_prefix() {
        assert_eq!(clean_join("/wd/hub", "/session"), "/wd/hub/session");
        assert_eq!(
            clean_join("/wd/hub/", "/session/abc"),
            "/wd/hub/session/abc"
        );
    }

    #[test]
    fn clean_join_collapses_dots_and_slashes() {
        assert_eq!(clean_join("/a//b", "/./c/../d"), "/a/b/d");
        assert_eq!(clean_join("", "/"), "/");
    }
}
