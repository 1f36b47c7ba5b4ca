pub mod health;
pub mod jobs;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /ws                    WebSocket stream of job lifecycle events
///
/// /jobs                  list, create
/// /jobs/{id}             get
/// /jobs/{id}/cancel      cancel (POST)
/// /jobs/{id}/result      result of a SUCCEEDED job
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .nest("/jobs", jobs::router())
}
