//! Application state shared across handlers.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use axum::body::Body;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

use crate::queue::AdmissionQueue;
use crate::service::Manager;
use crate::session::SessionRegistry;

/// Proxy-wide settings, read once at startup.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Host name placed in rewritten `Location` headers.
    pub hostname: String,
    /// Idle gap after which a session is deleted.
    pub session_timeout: Duration,
    /// Deadline for each individual creation attempt against the upstream.
    pub session_attempt_timeout: Duration,
    /// Deadline for the DELETE issued when a session times out.
    pub session_delete_timeout: Duration,
    /// Advertised session capacity.
    pub limit: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            session_timeout: Duration::from_secs(60),
            session_attempt_timeout: Duration::from_secs(30),
            session_delete_timeout: Duration::from_secs(10),
            limit: 5,
        }
    }
}

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Registry of live sessions.
    pub sessions: Arc<SessionRegistry>,
    /// Environment manager resolving capabilities to starters.
    pub manager: Arc<dyn Manager>,
    /// Admission counters.
    pub queue: Arc<AdmissionQueue>,
    /// Pooled HTTP client for upstream calls. Does not follow redirects,
    /// which the creation handshake relies on to observe Location headers.
    pub http_client: Client<HttpConnector, Body>,
    pub config: Arc<ProxyConfig>,
    started_at: Instant,
    serial: Arc<AtomicU64>,
    local_addr: Arc<OnceLock<SocketAddr>>,
}

impl AppState {
    pub fn new(manager: Arc<dyn Manager>, config: ProxyConfig) -> Self {
        let http_client: Client<HttpConnector, Body> =
            Client::builder(TokioExecutor::new()).build_http();
        Self {
            sessions: Arc::new(SessionRegistry::new()),
            manager,
            queue: Arc::new(AdmissionQueue::new(config.limit)),
            http_client,
            config: Arc::new(config),
            started_at: Instant::now(),
            serial: Arc::new(AtomicU64::new(0)),
            local_addr: Arc::new(OnceLock::new()),
        }
    }

    /// Next request serial, used for log correlation only.
    pub fn next_serial(&self) -> u64 {
        self.serial.fetch_add(1, Ordering::SeqCst)
    }

    /// Record the bound listener address. Expiry timers address their DELETE
    /// at this listener; until it is set they fall back to forced teardown.
    pub fn set_local_addr(&self, addr: SocketAddr) {
        let _ = self.local_addr.set(addr);
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
