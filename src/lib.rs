// Library exports for the binary and the integration tests

pub mod ai;
pub mod config;
pub mod coordinator;
pub mod export;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod store;

// Re-export AuthUser for convenience
pub use crate::middleware::auth::AuthUser;

use std::sync::Arc;

use crate::coordinator::Coordinator;

/// Application state shared across all request handlers
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
}
