//! Voice streaming gateway server
//!
//! The event-routed surface of the gateway: session store, socket event
//! router, turn orchestration, HTTP diagnostics, and metrics.

pub mod handlers;
pub mod http;
pub mod metrics;
pub mod rate_limit;
pub mod session;
pub mod state;
pub mod websocket;

pub use http::create_router;
pub use session::{Session, SessionStore};
pub use state::AppState;
