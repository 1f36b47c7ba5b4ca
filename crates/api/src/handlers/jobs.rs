//! Handlers for the `/jobs` resource.
//!
//! Thin adapters over [`JobService`](crate::service::JobService): extract,
//! delegate, wrap the result in a [`DataResponse`]. Extraction failures are
//! `BAD_REQUEST` errors.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use evalhub_core::job::CreateJob;
use evalhub_core::types::JobId;

use crate::error::AppResult;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::query::JobListQuery;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Create a new job. Returns 201 with the job in `PENDING` status; the
/// dispatcher submits it in the background.
pub async fn create_job(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<CreateJob>,
) -> AppResult<impl IntoResponse> {
    let job = state.jobs.create_job(input).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: job })))
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// List jobs, oldest first, optionally filtered by `status` and `job_type`.
pub async fn list_jobs(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    let filter = params.into_filter()?;
    let jobs = state.jobs.list_jobs(&filter).await?;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    ApiPath(job_id): ApiPath<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.jobs.get_job(job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

/// GET /api/v1/jobs/{id}/result
///
/// 409 unless the job has `SUCCEEDED`.
pub async fn get_job_result(
    State(state): State<AppState>,
    ApiPath(job_id): ApiPath<JobId>,
) -> AppResult<impl IntoResponse> {
    let result = state.jobs.get_result(job_id).await?;
    Ok(Json(DataResponse { data: result }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/cancel
///
/// Cancel a `PENDING` or `RUNNING` job. Returns 204; 409 if the job has
/// already finished.
pub async fn cancel_job(
    State(state): State<AppState>,
    ApiPath(job_id): ApiPath<JobId>,
) -> AppResult<StatusCode> {
    state.jobs.cancel_job(job_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
