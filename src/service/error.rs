//! Environment service error types.

use thiserror::Error;

/// Result type for environment operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors raised while starting, stopping or inspecting environments.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A container CLI invocation failed.
    #[error("container {command} failed: {message}")]
    CommandFailed { command: String, message: String },

    /// Invalid input provided (image name, container id, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The environment never started listening.
    #[error("container {container} did not start listening on {addr} in time")]
    NotResponding { container: String, addr: String },

    /// The backend returned an address the proxy cannot use.
    #[error("bad upstream address: {0}")]
    BadUpstream(String),

    /// A child process stream was unavailable.
    #[error("log stream missing {0}")]
    MissingStream(&'static str),

    /// Generic IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
