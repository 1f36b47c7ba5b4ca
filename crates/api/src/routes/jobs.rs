//! Route definitions for the `/jobs` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /                -> list_jobs
/// POST   /                -> create_job
/// GET    /{id}            -> get_job
/// POST   /{id}/cancel     -> cancel_job
/// GET    /{id}/result     -> get_job_result
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::list_jobs).post(jobs::create_job))
        .route("/{id}", get(jobs::get_job))
        .route("/{id}/cancel", post(jobs::cancel_job))
        .route("/{id}/result", get(jobs::get_job_result))
}
