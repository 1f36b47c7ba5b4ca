use std::sync::Arc;

use evalhub_events::EventBus;

use crate::config::ServerConfig;
use crate::service::JobService;

/// Shared application state available to all handlers via axum's `State` extractor.
///
/// Cheaply cloneable: every field is reference-counted.
#[derive(Clone)]
pub struct AppState {
    /// Job operations backed by the configured store and backend.
    pub jobs: Arc<JobService>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Lifecycle events, fanned out to WebSocket subscribers.
    pub event_bus: Arc<EventBus>,
}
