//! Gridgate Library
//!
//! Core components of the gridgate WebDriver session proxy: the HTTP/websocket
//! API surface, the session registry, capability parsing, the admission
//! counters, and the container-backed environment service.

pub mod api;
pub mod caps;
pub mod queue;
pub mod service;
pub mod session;
