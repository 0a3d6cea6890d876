//! Desired-capabilities parsing and screen-resolution normalization.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

static FULL_FORMAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]+x[0-9]+x(8|16|24)$").expect("invalid resolution pattern"));

static SHORT_FORMAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]+x[0-9]+$").expect("invalid resolution pattern"));

/// Fallback when the client does not request a resolution.
pub const DEFAULT_RESOLUTION: &str = "1920x1080x24";

/// Capability value the proxy could not make sense of.
#[derive(Debug, Error)]
pub enum CapsError {
    #[error(
        "Malformed screenResolution capability: {0}. Correct format is WxH (1920x1080) or WxHxD (1920x1080x24)."
    )]
    BadResolution(String),
}

/// Browser capabilities requested by the client.
///
/// Everything else inside `desiredCapabilities` is opaque to the proxy and
/// forwarded verbatim to the environment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Capabilities {
    #[serde(rename = "browserName", default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(rename = "screenResolution", default)]
    pub screen_resolution: String,
    #[serde(rename = "enableVNC", default)]
    pub vnc: bool,
}

/// Envelope of a session-creation request body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewSessionRequest {
    #[serde(rename = "desiredCapabilities", default)]
    pub caps: Capabilities,
}

/// Normalize a `screenResolution` capability to the `WxHxD` form.
///
/// An empty input selects the default. A `WxH` input gets the standard
/// 24-bit depth appended. Anything that matches neither grammar is rejected.
pub fn normalize_resolution(input: &str) -> Result<String, CapsError> {
    if input.is_empty() {
        return Ok(DEFAULT_RESOLUTION.to_string());
    }
    if FULL_FORMAT.is_match(input) {
        return Ok(input.to_string());
    }
    if SHORT_FORMAT.is_match(input) {
        return Ok(format!("{input}x24"));
    }
    Err(CapsError::BadResolution(input.to_string()))
}
