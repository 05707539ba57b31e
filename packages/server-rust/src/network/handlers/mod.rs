//! axum handlers and the state they share.

pub mod health;
pub mod query;

pub use health::{health_handler, liveness_handler, readiness_handler};
pub use query::{entities_handler, get_handler, query_handler, QueryParams};

use std::sync::Arc;
use std::time::Instant;

use super::{NetworkConfig, ShutdownController};
use crate::service::QueryService;

/// Shared application state passed to all axum handlers via `State` extraction.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<QueryService>,
    /// Health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<NetworkConfig>,
    /// Used for uptime reporting.
    pub start_time: Instant,
}

#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    use crate::service::QueryConfig;
    use crate::storage::MemoryBackend;

    let registry = Arc::new(crate::demo::registry().unwrap());
    let backend = MemoryBackend::new(Arc::clone(&registry));
    crate::demo::seed(&backend).unwrap();
    let service = QueryService::new(registry, Arc::new(backend), QueryConfig::default()).unwrap();

    AppState {
        service: Arc::new(service),
        shutdown: Arc::new(ShutdownController::new()),
        config: Arc::new(NetworkConfig::default()),
        start_time: Instant::now(),
    }
}
