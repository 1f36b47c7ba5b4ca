//! Online model-serving backend.
//!
//! Each submission becomes one `POST {base}/v1/evaluate` request executed in
//! a spawned task. The response body is the result. In-flight requests live
//! only in this process, so after a restart their handles are unknown.
//!
//! Submission waits up to `accept_window` for the endpoint to answer. A
//! connection failure or an error status inside that window is a submission
//! error; anything that goes wrong later is an execution failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use evalhub_core::backend::{
    BackendError, BackendHandle, BackendJobState, BackendSignal, ExecutionBackend, SignalSender,
    WorkOutcome,
};
use evalhub_core::status::JobType;
use evalhub_core::types::JobId;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::sync::{oneshot, RwLock};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ServingConfig {
    /// Base URL of the serving deployment.
    pub base_url: String,
    /// Upper bound on a single evaluation request.
    pub timeout: Duration,
    /// How long submission waits for the endpoint to accept or refuse.
    pub accept_window: Duration,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout: Duration::from_secs(600),
            accept_window: Duration::from_secs(2),
        }
    }
}

type InFlight = Arc<RwLock<HashMap<BackendHandle, AbortHandle>>>;

/// Reports whether the endpoint took the request. Dropped unsent when the
/// task is cancelled first.
type Admission = oneshot::Sender<Result<(), BackendError>>;

/// [`ExecutionBackend`] over an online serving endpoint.
pub struct ServingBackend {
    client: reqwest::Client,
    endpoint: String,
    accept_window: Duration,
    signals: SignalSender,
    in_flight: InFlight,
    cancel: CancellationToken,
}

impl ServingBackend {
    pub fn new(
        config: ServingConfig,
        signals: SignalSender,
        cancel: CancellationToken,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/evaluate", config.base_url.trim_end_matches('/')),
            accept_window: config.accept_window,
            signals,
            in_flight: Arc::new(RwLock::new(HashMap::new())),
            cancel,
        })
    }
}

/// Hand `err` to a submitter still waiting for admission. Once the submitter
/// has stopped waiting, the error becomes the work's failure outcome.
fn refuse(admission: Admission, err: BackendError, late: WorkOutcome) -> Option<WorkOutcome> {
    match admission.send(Err(err)) {
        Ok(()) => None,
        Err(_) => Some(late),
    }
}

/// Run one evaluation request to completion.
///
/// Returns `None` when the refusal was reported to the submitter instead.
async fn evaluate(
    client: reqwest::Client,
    endpoint: String,
    body: Value,
    admission: Admission,
) -> Option<WorkOutcome> {
    let response = match client.post(&endpoint).json(&body).send().await {
        Ok(response) => response,
        Err(e) => {
            let message = format!("Serving request failed: {e}");
            let late = WorkOutcome::Failed {
                message: message.clone(),
                details: None,
            };
            return refuse(admission, BackendError::Unavailable(message), late);
        }
    };

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        let message = format!("Serving endpoint returned {status}");
        let err = if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            BackendError::Unavailable(format!("{message}: {body}"))
        } else {
            BackendError::Rejected(format!("{message}: {body}"))
        };
        let late = WorkOutcome::Failed {
            message,
            details: Some(json!({ "status": status.as_u16(), "body": body })),
        };
        return refuse(admission, err, late);
    }
    // The submitter may have stopped waiting already.
    let _ = admission.send(Ok(()));

    Some(match response.json::<Value>().await {
        Ok(result) => WorkOutcome::Succeeded(result),
        Err(e) => WorkOutcome::Failed {
            message: format!("Serving endpoint returned an unreadable result: {e}"),
            details: None,
        },
    })
}

#[async_trait]
impl ExecutionBackend for ServingBackend {
    fn name(&self) -> &'static str {
        "serving"
    }

    async fn submit_work(
        &self,
        job_id: JobId,
        job_type: JobType,
        spec: &Value,
    ) -> Result<BackendHandle, BackendError> {
        let handle = BackendHandle::new(format!("serving-{job_id}"));
        let body = json!({ "job_id": job_id, "job_type": job_type, "spec": spec });
        let (admission, admitted) = oneshot::channel();

        {
            // Hold the write lock across the spawn so the task cannot remove
            // its entry before it is inserted.
            let mut in_flight = self.in_flight.write().await;
            if in_flight.contains_key(&handle) {
                return Err(BackendError::Rejected(format!("{handle} is already running")));
            }

            let client = self.client.clone();
            let endpoint = self.endpoint.clone();
            let signals = self.signals.clone();
            let registry = Arc::clone(&self.in_flight);
            let cancel = self.cancel.child_token();
            let task_handle = handle.clone();

            let task = tokio::spawn(async move {
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => None,
                    outcome = evaluate(client, endpoint, body, admission) => outcome,
                };
                let Some(outcome) = outcome else {
                    return;
                };

                let signal = BackendSignal {
                    job_id,
                    handle: task_handle.clone(),
                    outcome,
                };
                if signals.send(signal).await.is_err() {
                    tracing::error!(%job_id, handle = %task_handle, "Completion channel closed, signal dropped");
                }
                // Stay known to `lookup` until the outcome is queued.
                registry.write().await.remove(&task_handle);
            });
            in_flight.insert(handle.clone(), task.abort_handle());
        }

        match tokio::time::timeout(self.accept_window, admitted).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => {
                self.in_flight.write().await.remove(&handle);
                tracing::warn!(%job_id, error = %e, "Serving endpoint refused the evaluation");
                return Err(e);
            }
            Ok(Err(_)) => {
                self.in_flight.write().await.remove(&handle);
                return Err(BackendError::Unavailable(
                    "Serving request was stopped before it was accepted".to_string(),
                ));
            }
            Err(_) => {
                tracing::debug!(%job_id, handle = %handle, "No answer within the accept window, treating as accepted");
            }
        }

        tracing::info!(%job_id, handle = %handle, "Started serving evaluation");
        Ok(handle)
    }

    async fn lookup(&self, handle: &BackendHandle) -> Result<Option<BackendJobState>, BackendError> {
        let known = self.in_flight.read().await.contains_key(handle);
        Ok(known.then_some(BackendJobState::Running))
    }

    async fn watch(&self, _job_id: JobId, handle: &BackendHandle) -> Result<(), BackendError> {
        // Only requests started by this process can be watched, and those
        // already deliver their own signal.
        if self.in_flight.read().await.contains_key(handle) {
            Ok(())
        } else {
            Err(BackendError::Rejected(format!("{handle} is not in flight")))
        }
    }

    async fn cancel(&self, handle: &BackendHandle) -> Result<(), BackendError> {
        if let Some(task) = self.in_flight.write().await.remove(handle) {
            task.abort();
            tracing::info!(handle = %handle, "Aborted serving evaluation");
        }
        Ok(())
    }
}
