//! Test utilities: a stub environment manager, stub upstream servers and a
//! fully served proxy instance on an ephemeral port.

use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use bytes::Bytes;
use http::{HeaderMap, Method, Request, StatusCode, header};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

use gridgate::api::{AppState, ProxyConfig, create_router};
use gridgate::service::{
    CancelFn, LogStream, Manager, ServiceError, ServiceResult, StartedEnvironment, Starter,
    Upstream,
};

/// Environment manager stub: every `firefox` request resolves to a fixed
/// upstream; everything else is unavailable.
pub struct StubManager {
    pub upstream: Upstream,
    pub vnc: Option<String>,
    pub container: Option<String>,
    pub fail_start: bool,
    pub logs: Vec<u8>,
    pub cancelled: Arc<AtomicUsize>,
}

impl StubManager {
    pub fn new(upstream_addr: SocketAddr) -> Self {
        Self {
            upstream: Upstream {
                host: upstream_addr.to_string(),
                path: String::new(),
            },
            vnc: None,
            container: Some("deadbeefcafe".to_string()),
            fail_start: false,
            logs: b"stub container log\n".to_vec(),
            cancelled: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Manager for StubManager {
    fn find(
        &self,
        name: &str,
        version: &mut String,
        _screen: &str,
        _vnc: bool,
        _serial: u64,
    ) -> Option<Box<dyn Starter>> {
        if name != "firefox" {
            return None;
        }
        if version.is_empty() {
            *version = "57.0".to_string();
        }
        Some(Box::new(StubStarter {
            upstream: self.upstream.clone(),
            vnc: self.vnc.clone(),
            container: self.container.clone(),
            fail_start: self.fail_start,
            cancelled: self.cancelled.clone(),
        }))
    }

    async fn follow_logs(&self, _container: &str) -> ServiceResult<LogStream> {
        Ok(LogStream::from_reader(Cursor::new(self.logs.clone())))
    }
}

struct StubStarter {
    upstream: Upstream,
    vnc: Option<String>,
    container: Option<String>,
    fail_start: bool,
    cancelled: Arc<AtomicUsize>,
}

#[async_trait]
impl Starter for StubStarter {
    async fn start_with_cancel(self: Box<Self>) -> ServiceResult<StartedEnvironment> {
        if self.fail_start {
            return Err(ServiceError::CommandFailed {
                command: "run".to_string(),
                message: "no such image".to_string(),
            });
        }
        let cancelled = self.cancelled.clone();
        let cancel: CancelFn = Box::new(move || {
            Box::pin(async move {
                cancelled.fetch_add(1, Ordering::SeqCst);
            })
        });
        Ok(StartedEnvironment {
            upstream: self.upstream.clone(),
            container: self.container.clone(),
            vnc: self.vnc.clone(),
            cancel,
        })
    }
}

/// A proxy instance served for real on an ephemeral loopback port.
pub struct TestApp {
    pub addr: SocketAddr,
    pub state: AppState,
    pub client: Client<HttpConnector, Body>,
}

/// Short-fuse config so timeout scenarios run quickly.
pub fn test_config() -> ProxyConfig {
    ProxyConfig {
        hostname: "localhost".to_string(),
        session_timeout: std::time::Duration::from_secs(60),
        session_attempt_timeout: std::time::Duration::from_secs(5),
        session_delete_timeout: std::time::Duration::from_secs(2),
        limit: 5,
    }
}

pub async fn spawn_app(manager: Arc<dyn Manager>, config: ProxyConfig) -> TestApp {
    let state = AppState::new(manager, config);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    state.set_local_addr(addr);

    let router = create_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestApp {
        addr,
        state,
        client: Client::builder(TokioExecutor::new()).build_http(),
    }
}

/// Serve an arbitrary router on an ephemeral port (stub upstreams).
pub async fn spawn_upstream(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

impl TestApp {
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, HeaderMap, Bytes) {
        let mut builder = Request::builder()
            .method(method)
            .uri(format!("http://{}{}", self.addr, path));
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&json).unwrap())
            }
            None => Body::empty(),
        };
        let response = self
            .client
            .request(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(Body::new(response.into_body()), 1024 * 1024)
            .await
            .unwrap();
        (status, headers, bytes)
    }

    pub async fn create_session(&self, caps: serde_json::Value) -> (StatusCode, Bytes) {
        let (status, _, body) = self
            .request(
                Method::POST,
                "/wd/hub/session",
                Some(serde_json::json!({ "desiredCapabilities": caps })),
            )
            .await;
        (status, body)
    }
}
