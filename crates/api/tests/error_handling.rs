//! Tests for `AppError` → HTTP response mapping.
//!
//! Each error kind must keep a stable status code and `code` string. These
//! tests call `IntoResponse` directly; no router is involved.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use evalhub_api::error::AppError;
use evalhub_core::error::CoreError;
use evalhub_core::status::JobStatus;
use evalhub_core::types::new_job_id;
use evalhub_db::StoreError;
use http_body_util::BodyExt;

/// Helper: convert an `AppError` into its status code and parsed JSON body.
async fn error_to_response(err: AppError) -> (StatusCode, serde_json::Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

#[tokio::test]
async fn not_found_error_returns_404() {
    let id = new_job_id();
    let err = AppError::Core(CoreError::job_not_found(id));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
    assert_eq!(json["error"], format!("Job with id {id} not found"));
}

#[tokio::test]
async fn lifecycle_conflicts_return_409_with_distinct_codes() {
    let id = new_job_id();
    let cases = [
        (
            CoreError::InvalidTransition {
                id,
                from: JobStatus::Succeeded,
                to: JobStatus::Running,
            },
            "INVALID_TRANSITION",
        ),
        (CoreError::AlreadyDispatched(id), "ALREADY_DISPATCHED"),
        (
            CoreError::NotCancellable {
                id,
                status: JobStatus::Failed,
            },
            "NOT_CANCELLABLE",
        ),
        (CoreError::Conflict("not finished".into()), "CONFLICT"),
    ];

    for (err, code) in cases {
        let (status, json) = error_to_response(AppError::Core(err)).await;
        assert_eq!(status, StatusCode::CONFLICT, "{code}");
        assert_eq!(json["code"], code);
    }
}

#[tokio::test]
async fn validation_error_returns_400() {
    let err = AppError::Core(CoreError::Validation("Job name must not be empty".into()));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "VALIDATION_ERROR");
    assert_eq!(json["error"], "Job name must not be empty");
}

#[tokio::test]
async fn bad_request_error_returns_400() {
    let err = AppError::BadRequest("limit must not be negative".into());

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn internal_error_returns_500_and_sanitizes_message() {
    let err = AppError::InternalError("secret database credentials leaked".into());

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "INTERNAL_ERROR");
    assert_eq!(json["error"], "An internal error occurred");
}

#[tokio::test]
async fn corrupt_row_is_an_internal_error() {
    let err = AppError::from(StoreError::CorruptRow {
        id: new_job_id(),
        reason: "unknown status id 9".into(),
    });

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "An internal error occurred");
}

#[tokio::test]
async fn row_not_found_maps_to_404() {
    let err = AppError::Database(sqlx::Error::RowNotFound);

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
}
