//! WebDriver-compatible JSON error envelope.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

/// WebDriver legacy status code for "unknown error"; clients only inspect
/// the message, so every envelope carries this value.
const UNKNOWN_ERROR: u8 = 13;

/// Errors surfaced to WebDriver clients.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),

    #[error("{0}")]
    BadGateway(String),

    #[error("invalid session id")]
    InvalidSession,
}

impl ProxyError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn bad_gateway(msg: impl Into<String>) -> Self {
        Self::BadGateway(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::InvalidSession => StatusCode::NOT_FOUND,
        }
    }
}

/// `{"value": {"message": …}, "status": 13}` body.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub value: ErrorValue,
    pub status: u8,
}

#[derive(Debug, Serialize)]
pub struct ErrorValue {
    pub message: String,
}

impl ErrorEnvelope {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            value: ErrorValue {
                message: message.into(),
            },
            status: UNKNOWN_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();

        match &self {
            Self::Internal(msg) | Self::BadGateway(msg) => {
                error!(status = %status, message = %msg, "request failed");
            }
            _ => {
                debug!(status = %status, message = %message, "client error");
            }
        }

        (status, Json(ErrorEnvelope::new(message))).into_response()
    }
}
