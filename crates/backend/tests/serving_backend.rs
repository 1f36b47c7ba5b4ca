//! Serving backend against an in-process mock evaluation endpoint.

use std::time::Duration;

use assert_matches::assert_matches;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use evalhub_backend::{ServingBackend, ServingConfig};
use evalhub_core::backend::{
    completion_channel, BackendError, BackendHandle, BackendJobState, BackendSignal,
    ExecutionBackend, WorkOutcome,
};
use evalhub_core::status::JobType;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    format!("http://{addr}")
}

fn serving_backend(base_url: String, tx: evalhub_core::backend::SignalSender) -> ServingBackend {
    let config = ServingConfig {
        base_url,
        timeout: Duration::from_secs(5),
        accept_window: Duration::from_millis(100),
    };
    ServingBackend::new(config, tx, CancellationToken::new()).unwrap()
}

async fn wait_until_forgotten(backend: &ServingBackend, handle: &BackendHandle) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while backend.lookup(handle).await.unwrap().is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("handle forgotten after completion");
}

#[tokio::test]
async fn response_body_becomes_the_result() {
    let router = Router::new().route(
        "/v1/evaluate",
        post(|Json(body): Json<Value>| async move {
            Json(json!({"rouge": 0.42, "model": body["spec"]["model"]}))
        }),
    );
    let (tx, mut rx) = completion_channel();
    let backend = serving_backend(serve(router).await, tx);
    let job_id = uuid::Uuid::now_v7();

    let handle = backend
        .submit_work(job_id, JobType::Evaluation, &json!({"model": "bart-large-cnn"}))
        .await
        .unwrap();

    let signal = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(signal.job_id, job_id);
    assert_eq!(signal.handle, handle);
    assert_eq!(
        signal.outcome,
        WorkOutcome::Succeeded(json!({"rouge": 0.42, "model": "bart-large-cnn"}))
    );
    wait_until_forgotten(&backend, &handle).await;
}

#[tokio::test]
async fn unreachable_endpoint_fails_submission() {
    let (tx, mut rx) = completion_channel();
    let backend = serving_backend("http://127.0.0.1:1".to_string(), tx);
    let job_id = uuid::Uuid::now_v7();

    let err = backend
        .submit_work(job_id, JobType::Evaluation, &json!({}))
        .await
        .unwrap_err();

    assert_matches!(err, BackendError::Unavailable(_));
    let handle = BackendHandle::new(format!("serving-{job_id}"));
    assert_eq!(backend.lookup(&handle).await.unwrap(), None);
    let nothing = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(nothing.is_err(), "refused submission must not deliver a signal");
}

#[tokio::test]
async fn immediate_error_status_fails_submission() {
    let router = Router::new().route(
        "/v1/evaluate",
        post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "warming up") }),
    );
    let (tx, _rx) = completion_channel();
    let backend = serving_backend(serve(router).await, tx);
    let job_id = uuid::Uuid::now_v7();
    let err = backend
        .submit_work(job_id, JobType::Evaluation, &json!({}))
        .await
        .unwrap_err();
    assert!(err.is_transient());

    // Refused submissions leave nothing behind, so a retry is not "already running".
    let err = backend
        .submit_work(job_id, JobType::Evaluation, &json!({}))
        .await
        .unwrap_err();
    assert_matches!(err, BackendError::Unavailable(ref m) if m.contains("warming up"));

    let router = Router::new().route(
        "/v1/evaluate",
        post(|| async { (StatusCode::UNPROCESSABLE_ENTITY, "unknown model") }),
    );
    let (tx, _rx) = completion_channel();
    let backend = serving_backend(serve(router).await, tx);
    let err = backend
        .submit_work(uuid::Uuid::now_v7(), JobType::Evaluation, &json!({}))
        .await
        .unwrap_err();
    assert_matches!(err, BackendError::Rejected(_));
}

#[tokio::test]
async fn late_error_status_becomes_a_failure() {
    let router = Router::new().route(
        "/v1/evaluate",
        post(|| async {
            tokio::time::sleep(Duration::from_millis(400)).await;
            (StatusCode::INTERNAL_SERVER_ERROR, "model crashed")
        }),
    );
    let (tx, mut rx) = completion_channel();
    let backend = serving_backend(serve(router).await, tx);

    backend
        .submit_work(uuid::Uuid::now_v7(), JobType::Inference, &json!({}))
        .await
        .unwrap();

    let signal = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_matches!(
        signal.outcome,
        WorkOutcome::Failed { details: Some(ref d), .. } if d["status"] == 500 && d["body"] == "model crashed"
    );
}

#[tokio::test]
async fn in_flight_request_is_running_until_cancelled() {
    let router = Router::new().route(
        "/v1/evaluate",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Json(json!({}))
        }),
    );
    let (tx, mut rx) = completion_channel();
    let backend = serving_backend(serve(router).await, tx);
    let job_id = uuid::Uuid::now_v7();

    let handle = backend
        .submit_work(job_id, JobType::Evaluation, &json!({}))
        .await
        .unwrap();
    assert_eq!(backend.lookup(&handle).await.unwrap(), Some(BackendJobState::Running));
    assert!(backend.watch(job_id, &handle).await.is_ok());

    backend.cancel(&handle).await.unwrap();
    assert_eq!(backend.lookup(&handle).await.unwrap(), None);
    assert!(backend.watch(job_id, &handle).await.is_err());

    let nothing = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(nothing.is_err(), "aborted request must not deliver a signal");
}

#[tokio::test]
async fn handle_stays_known_until_its_outcome_is_queued() {
    let router = Router::new().route("/v1/evaluate", post(|| async { Json(json!({"bleu": 31.2})) }));
    let (tx, mut rx) = tokio::sync::mpsc::channel(1);
    // Fill the channel so the task has to wait to queue its outcome.
    tx.send(BackendSignal {
        job_id: uuid::Uuid::now_v7(),
        handle: BackendHandle::new("earlier"),
        outcome: WorkOutcome::Succeeded(json!({})),
    })
    .await
    .unwrap();
    let backend = serving_backend(serve(router).await, tx);

    let handle = backend
        .submit_work(uuid::Uuid::now_v7(), JobType::Evaluation, &json!({}))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(backend.lookup(&handle).await.unwrap(), Some(BackendJobState::Running));

    let earlier = rx.recv().await.unwrap();
    assert_eq!(earlier.handle.as_str(), "earlier");
    let signal = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(signal.handle, handle);
    wait_until_forgotten(&backend, &handle).await;
}
