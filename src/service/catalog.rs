//! Browser catalog configuration.
//!
//! Maps a browser name to the container images that provide each version.
//! Loaded once at startup from a JSON file of the shape:
//!
//! ```json
//! {
//!   "firefox": {
//!     "default": "57.0",
//!     "versions": {
//!       "57.0": { "image": "selenoid/firefox:57.0", "port": 4444, "path": "/wd/hub" }
//!     }
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use super::error::{ServiceError, ServiceResult};

/// A single runnable browser image.
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserImage {
    /// Container image reference.
    pub image: String,
    /// Port inside the container where the WebDriver endpoint listens.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Path prefix of the WebDriver endpoint; empty for root.
    #[serde(default)]
    pub path: String,
}

fn default_port() -> u16 {
    4444
}

/// Versions available for one browser name.
#[derive(Debug, Clone, Deserialize)]
pub struct Browser {
    /// Version selected when the client does not request one.
    pub default: String,
    pub versions: HashMap<String, BrowserImage>,
}

/// The full browser-name → versions catalog.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    browsers: HashMap<String, Browser>,
}

impl Catalog {
    pub fn load(path: impl AsRef<Path>) -> ServiceResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| ServiceError::InvalidInput(format!("browser catalog: {e}")))
    }

    #[cfg(test)]
    pub fn from_json(raw: &str) -> Self {
        serde_json::from_str(raw).expect("invalid catalog fixture")
    }

    /// Resolve a browser name and version request to a concrete image.
    ///
    /// An empty version selects the browser's default; otherwise the request
    /// is matched as a version prefix ("57" matches "57.0"). Returns the
    /// resolved version alongside the image.
    pub fn resolve(&self, name: &str, version: &str) -> Option<(String, BrowserImage)> {
        let browser = self.browsers.get(name)?;
        let wanted = if version.is_empty() {
            browser.default.as_str()
        } else {
            version
        };
        if let Some(image) = browser.versions.get(wanted) {
            return Some((wanted.to_string(), image.clone()));
        }
        let mut candidates: Vec<&String> = browser
            .versions
            .keys()
            .filter(|v| v.starts_with(wanted))
            .collect();
        candidates.sort();
        let resolved = candidates.first()?.to_string();
        let image = browser.versions[&resolved].clone();
        Some((resolved, image))
    }
}
