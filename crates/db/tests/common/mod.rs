#![allow(dead_code)]

use std::sync::Arc;

use assert_matches::assert_matches;
use evalhub_core::backend::BackendHandle;
use evalhub_core::error::CoreError;
use evalhub_core::job::{CreateJob, JobFailure, JobFilter};
use evalhub_core::lifecycle::Transition;
use evalhub_core::status::{FailureKind, JobStatus, JobType};
use evalhub_db::{JobStore, StoreError};
use serde_json::json;

pub fn create_job(name: &str) -> CreateJob {
    CreateJob {
        job_type: JobType::Evaluation,
        name: name.to_string(),
        description: Some("summarization quality".to_string()),
        spec: json!({"model": "bart-large-cnn", "dataset": "xsum-sample", "metrics": ["rouge"]}),
    }
}

// ---------------------------------------------------------------------------
// Contract checks shared by every store implementation
// ---------------------------------------------------------------------------

pub async fn create_then_get(store: &dyn JobStore) {
    let created = store.create(create_job("get me")).await.unwrap();
    assert_eq!(created.status, JobStatus::Pending);
    assert_eq!(created.created_at, created.updated_at);

    let fetched = store.get(created.id).await.unwrap();
    assert_eq!(fetched.id, created.id);
    assert_eq!(fetched.name, "get me");
    assert_eq!(fetched.spec["model"], "bart-large-cnn");
}

pub async fn unknown_id_is_not_found(store: &dyn JobStore) {
    let err = store.get(uuid::Uuid::now_v7()).await.unwrap_err();
    assert_matches!(err, StoreError::Core(CoreError::NotFound { .. }));
}

pub async fn full_lifecycle(store: &dyn JobStore) {
    let job = store.create(create_job("lifecycle")).await.unwrap();
    let running = store.update(job.id, Transition::Start).await.unwrap();
    assert_eq!(running.status, JobStatus::Running);
    assert!(running.started_at.is_some());

    let done = store
        .update(job.id, Transition::Succeed { result: json!({"rouge": 0.42}) })
        .await
        .unwrap();
    assert_eq!(done.status, JobStatus::Succeeded);
    assert_eq!(done.result, Some(json!({"rouge": 0.42})));
    assert!(done.check_invariants().is_ok());

    let persisted = store.get(job.id).await.unwrap();
    assert_eq!(persisted.result, done.result);
    assert!(persisted.finished_at.is_some());
}

pub async fn illegal_transition_leaves_job_unchanged(store: &dyn JobStore) {
    let job = store.create(create_job("illegal")).await.unwrap();
    let err = store
        .update(job.id, Transition::Succeed { result: json!({}) })
        .await
        .unwrap_err();
    assert_matches!(
        err,
        StoreError::Core(CoreError::InvalidTransition { from: JobStatus::Pending, to: JobStatus::Succeeded, .. })
    );
    assert_eq!(store.get(job.id).await.unwrap().status, JobStatus::Pending);

    store.update(job.id, Transition::Cancel).await.unwrap();
    let err = store.update(job.id, Transition::Start).await.unwrap_err();
    assert_matches!(err, StoreError::Core(CoreError::InvalidTransition { .. }));
}

pub async fn failure_record_round_trips(store: &dyn JobStore) {
    let job = store.create(create_job("fails")).await.unwrap();
    store.update(job.id, Transition::Start).await.unwrap();
    let failure = JobFailure::new(FailureKind::ExecutionError, "CUDA out of memory")
        .with_details(json!({"exit_code": 137}));
    store
        .update(job.id, Transition::Fail { failure: failure.clone() })
        .await
        .unwrap();

    let persisted = store.get(job.id).await.unwrap();
    assert_eq!(persisted.status, JobStatus::Failed);
    assert_eq!(persisted.error, Some(failure));
    assert!(persisted.result.is_none());
}

pub async fn attach_handle_rules(store: &dyn JobStore) {
    let handle = BackendHandle::new("raysubmit_abc");
    let job = store.create(create_job("handles")).await.unwrap();

    let err = store.attach_handle(job.id, &handle).await.unwrap_err();
    assert_matches!(err, StoreError::Core(CoreError::Conflict(_)));

    store.update(job.id, Transition::Start).await.unwrap();
    let attached = store.attach_handle(job.id, &handle).await.unwrap();
    assert_eq!(attached.backend_handle, Some(handle.clone()));
    store.attach_handle(job.id, &handle).await.unwrap();

    let err = store
        .attach_handle(job.id, &BackendHandle::new("raysubmit_other"))
        .await
        .unwrap_err();
    assert_matches!(err, StoreError::Core(CoreError::Conflict(_)));

    store.update(job.id, Transition::Cancel).await.unwrap();
    let after = store
        .attach_handle(job.id, &BackendHandle::new("late"))
        .await
        .unwrap();
    assert_eq!(after.status, JobStatus::Cancelled);
    assert_eq!(after.backend_handle, Some(handle));
}

pub async fn list_is_ordered_and_filtered(store: &dyn JobStore) {
    let first = store.create(create_job("first")).await.unwrap();
    let second = store.create(create_job("second")).await.unwrap();
    let mut inference = create_job("third");
    inference.job_type = JobType::Inference;
    let third = store.create(inference).await.unwrap();
    store.update(second.id, Transition::Start).await.unwrap();

    let all = store.list(&JobFilter::default()).await.unwrap();
    let ids: Vec<_> = all.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![first.id, second.id, third.id]);

    let pending = store.list(&JobFilter::with_status(JobStatus::Pending)).await.unwrap();
    assert_eq!(pending.iter().map(|j| j.id).collect::<Vec<_>>(), vec![first.id, third.id]);

    let by_type = JobFilter {
        job_type: Some(JobType::Inference),
        ..Default::default()
    };
    assert_eq!(store.list(&by_type).await.unwrap().len(), 1);

    let page = JobFilter {
        limit: Some(1),
        offset: Some(1),
        ..Default::default()
    };
    let page = store.list(&page).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, second.id);

    let started_before = JobFilter {
        started_before: Some(chrono::Utc::now() + chrono::Duration::seconds(1)),
        ..Default::default()
    };
    let started = store.list(&started_before).await.unwrap();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].id, second.id);
}

pub async fn concurrent_creates_get_distinct_ids(store: Arc<dyn JobStore>) {
    let handles: Vec<_> = (0..50)
        .map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.create(create_job(&format!("job {i}"))).await })
        })
        .collect();

    let mut ids = std::collections::HashSet::new();
    for handle in handles {
        let job = handle.await.unwrap().unwrap();
        assert!(ids.insert(job.id), "duplicate id {}", job.id);
    }
    assert_eq!(ids.len(), 50);
}

pub async fn concurrent_terminal_writes_have_one_winner(store: Arc<dyn JobStore>) {
    let job = store.create(create_job("race")).await.unwrap();
    store.update(job.id, Transition::Start).await.unwrap();

    let succeed = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            store
                .update(job.id, Transition::Succeed { result: json!({"rouge": 0.42}) })
                .await
        })
    };
    let cancel = {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.update(job.id, Transition::Cancel).await })
    };

    let results = [succeed.await.unwrap(), cancel.await.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);

    let persisted = store.get(job.id).await.unwrap();
    assert!(persisted.status.is_terminal());
    assert!(persisted.check_invariants().is_ok());
}
