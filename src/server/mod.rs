//! HTTP server — router, webhook, read-only REST endpoints.

pub mod notifications;
pub mod routes;

pub use routes::{build_router, AppState};
