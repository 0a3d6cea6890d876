//! Environment provisioning contracts.
//!
//! The session layer is agnostic of how browser environments come to exist.
//! A [`Manager`] resolves requested capabilities to a [`Starter`]; the
//! starter brings one environment up and hands back its address, an optional
//! container handle, an optional VNC endpoint, and a one-shot cancel action
//! that tears the environment down again.

mod catalog;
mod docker;
mod error;

pub use catalog::{BrowserImage, Catalog};
pub use docker::DockerManager;
pub use error::{ServiceError, ServiceResult};

use async_trait::async_trait;
use futures::future::BoxFuture;
use http::Uri;
use tokio::io::AsyncRead;
use tokio::process::Child;

/// One-shot asynchronous teardown of a started environment.
pub type CancelFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Base address of an environment: authority plus an optional path prefix.
///
/// The path is empty (not `/`) when the environment serves the protocol at
/// its root; the creation handshake may rewrite it to `/wd/hub` for
/// environments that expose the protocol under that prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub host: String,
    pub path: String,
}

impl Upstream {
    /// Parse an `http://host:port[/path]` address.
    pub fn parse(raw: &str) -> ServiceResult<Self> {
        let uri: Uri = raw
            .parse()
            .map_err(|_| ServiceError::BadUpstream(raw.to_string()))?;
        let host = uri
            .authority()
            .ok_or_else(|| ServiceError::BadUpstream(raw.to_string()))?
            .to_string();
        let path = match uri.path() {
            "/" => String::new(),
            path => path.to_string(),
        };
        Ok(Self { host, path })
    }

    /// Build a full request URI against this upstream.
    pub fn uri(&self, path_and_query: &str) -> ServiceResult<Uri> {
        format!("http://{}{}", self.host, path_and_query)
            .parse()
            .map_err(|_| ServiceError::BadUpstream(format!("{}{}", self.host, path_and_query)))
    }
}

impl std::fmt::Display for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "http://{}{}", self.host, self.path)
    }
}

/// A running environment as returned by a starter.
pub struct StartedEnvironment {
    pub upstream: Upstream,
    /// Container handle for log tailing; `None` for non-container backends.
    pub container: Option<String>,
    /// `host:port` of the VNC server, when the session requested one.
    pub vnc: Option<String>,
    pub cancel: CancelFn,
}

/// One-shot factory that brings a single environment into existence.
#[async_trait]
pub trait Starter: Send {
    async fn start_with_cancel(self: Box<Self>) -> ServiceResult<StartedEnvironment>;
}

/// Follow-mode log stream of a container environment.
///
/// Dropping the stream (or the process handle from [`LogStream::into_parts`])
/// releases the underlying process, if any.
pub struct LogStream {
    stdout: Box<dyn AsyncRead + Send + Unpin>,
    stderr: Option<Box<dyn AsyncRead + Send + Unpin>>,
    process: Option<Child>,
}

impl LogStream {
    /// Wrap a spawned child whose stdout (and optionally stderr) carry logs.
    pub fn from_child(mut child: Child) -> ServiceResult<Self> {
        let stdout = child.stdout.take().ok_or(ServiceError::MissingStream("stdout"))?;
        let stderr = child.stderr.take();
        Ok(Self {
            stdout: Box::new(stdout),
            stderr: stderr.map(|s| Box::new(s) as Box<dyn AsyncRead + Send + Unpin>),
            process: Some(child),
        })
    }

    /// Wrap an arbitrary reader. Used by non-process backends and tests.
    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            stdout: Box::new(reader),
            stderr: None,
            process: None,
        }
    }

    /// Split into (stdout, stderr, process handle). The caller must keep the
    /// handle alive while reading; dropping it kills the tail.
    #[allow(clippy::type_complexity)]
    pub fn into_parts(
        self,
    ) -> (
        Box<dyn AsyncRead + Send + Unpin>,
        Option<Box<dyn AsyncRead + Send + Unpin>>,
        Option<Child>,
    ) {
        (self.stdout, self.stderr, self.process)
    }
}

/// Resolves requested capabilities to environment starters.
#[async_trait]
pub trait Manager: Send + Sync {
    /// Find a starter for the requested browser.
    ///
    /// `version` may be empty or a prefix; on success it is rewritten to the
    /// concrete version the starter will launch. `serial` is the request
    /// serial, for log correlation only.
    fn find(
        &self,
        name: &str,
        version: &mut String,
        screen: &str,
        vnc: bool,
        serial: u64,
    ) -> Option<Box<dyn Starter>>;

    /// Open a follow-mode stream over the container's combined output.
    async fn follow_logs(&self, container: &str) -> ServiceResult<LogStream>;
}
