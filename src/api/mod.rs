//! HTTP and websocket API surface.

mod create;
mod error;
mod handlers;
mod proxy;
mod routes;
mod state;
mod tunnel;

pub use error::ProxyError;
pub use routes::create_router;
pub use state::{AppState, ProxyConfig};
