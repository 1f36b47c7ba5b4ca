//! Batch cluster backend.
//!
//! Work is submitted to a Ray-style job API under the submission id
//! `evalhub-{job_id}`, which becomes the [`BackendHandle`]. A poller task per
//! handle reads the job status every `poll_interval` and emits exactly one
//! [`BackendSignal`] when the cluster reports a terminal state. A successful
//! result is the artifact locator the evaluator wrote its output to.

pub mod api;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use evalhub_core::backend::{
    BackendError, BackendHandle, BackendJobState, BackendSignal, ExecutionBackend, SignalSender,
    WorkOutcome,
};
use evalhub_core::status::JobType;
use evalhub_core::types::JobId;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use self::api::{ClusterApi, ClusterJobStatus, JobDetails, SubmitRequest};

/// Metadata key carrying the result locator of a submission.
const RESULTS_URI_KEY: &str = "results_uri";

/// Metadata key carrying the evalhub job id of a submission.
const JOB_ID_KEY: &str = "evalhub_job_id";

/// Connection and polling settings for [`ClusterBackend`].
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Dashboard URL of the head node.
    pub base_url: String,
    /// Command the cluster runs for each job.
    pub entrypoint: String,
    pub poll_interval: Duration,
    /// Prefix under which each job writes `{job_id}/results.json`.
    pub results_prefix: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8265".to_string(),
            entrypoint: "python -m evaluator.run".to_string(),
            poll_interval: Duration::from_secs(5),
            results_prefix: "s3://evalhub/jobs".to_string(),
        }
    }
}

/// [`ExecutionBackend`] over a batch compute cluster.
pub struct ClusterBackend {
    api: Arc<ClusterApi>,
    config: ClusterConfig,
    signals: SignalSender,
    /// Handles with a live poller in this process.
    watched: Arc<Mutex<HashSet<BackendHandle>>>,
    /// Stops every poller on shutdown.
    cancel: CancellationToken,
}

impl ClusterBackend {
    pub fn new(
        config: ClusterConfig,
        signals: SignalSender,
        cancel: CancellationToken,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            api: Arc::new(ClusterApi::new(&config.base_url)?),
            config,
            signals,
            watched: Arc::new(Mutex::new(HashSet::new())),
            cancel,
        })
    }

    fn results_uri(&self, job_id: JobId) -> String {
        format!(
            "{}/{}/results.json",
            self.config.results_prefix.trim_end_matches('/'),
            job_id
        )
    }

    /// Start a poller for `handle` unless one is already running.
    async fn spawn_poller(&self, job_id: JobId, handle: BackendHandle) {
        if !self.watched.lock().await.insert(handle.clone()) {
            return;
        }
        tracing::debug!(%job_id, handle = %handle, "Watching cluster job");

        let poller = Poller {
            api: Arc::clone(&self.api),
            signals: self.signals.clone(),
            watched: Arc::clone(&self.watched),
            interval: self.config.poll_interval,
            cancel: self.cancel.child_token(),
        };
        tokio::spawn(poller.run(job_id, handle));
    }
}

#[async_trait]
impl ExecutionBackend for ClusterBackend {
    fn name(&self) -> &'static str {
        "cluster"
    }

    async fn submit_work(
        &self,
        job_id: JobId,
        job_type: JobType,
        spec: &Value,
    ) -> Result<BackendHandle, BackendError> {
        let submission_id = format!("evalhub-{job_id}");
        let results_uri = self.results_uri(job_id);
        let request = SubmitRequest {
            submission_id: &submission_id,
            entrypoint: &self.config.entrypoint,
            runtime_env: json!({
                "env_vars": {
                    "EVALHUB_JOB_ID": job_id.to_string(),
                    "EVALHUB_JOB_TYPE": job_type.as_str(),
                    "EVALHUB_JOB_SPEC": spec.to_string(),
                    "EVALHUB_RESULTS_URI": results_uri,
                }
            }),
            metadata: HashMap::from([
                (JOB_ID_KEY.to_string(), job_id.to_string()),
                (RESULTS_URI_KEY.to_string(), results_uri.clone()),
            ]),
        };

        let handle = match self.api.submit(&request).await {
            Ok(accepted) => BackendHandle::new(accepted.submission_id),
            Err(e) => {
                let err = BackendError::from(e);
                if !matches!(err, BackendError::Rejected(_)) {
                    return Err(err);
                }
                // A retried submission is refused once an earlier attempt
                // reached the cluster; adopt that submission instead.
                match self.api.get_job(&submission_id).await {
                    Ok(Some(_)) => {
                        tracing::info!(%job_id, submission_id = %submission_id, "Cluster already holds this submission");
                        BackendHandle::new(submission_id.clone())
                    }
                    _ => return Err(err),
                }
            }
        };
        tracing::info!(%job_id, handle = %handle, "Submitted job to cluster");

        self.spawn_poller(job_id, handle.clone()).await;
        Ok(handle)
    }

    async fn lookup(&self, handle: &BackendHandle) -> Result<Option<BackendJobState>, BackendError> {
        let details = self.api.get_job(handle.as_str()).await?;
        Ok(details.map(|d| state_for(&d, handle)))
    }

    async fn watch(&self, job_id: JobId, handle: &BackendHandle) -> Result<(), BackendError> {
        self.spawn_poller(job_id, handle.clone()).await;
        Ok(())
    }

    async fn cancel(&self, handle: &BackendHandle) -> Result<(), BackendError> {
        self.api.stop_job(handle.as_str()).await?;
        tracing::info!(handle = %handle, "Requested cluster job stop");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

struct Poller {
    api: Arc<ClusterApi>,
    signals: SignalSender,
    watched: Arc<Mutex<HashSet<BackendHandle>>>,
    interval: Duration,
    cancel: CancellationToken,
}

impl Poller {
    async fn run(self, job_id: JobId, handle: BackendHandle) {
        let outcome = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break None,
                _ = tokio::time::sleep(self.interval) => {}
            }

            match self.api.get_job(handle.as_str()).await {
                Ok(Some(details)) => {
                    if let Some(outcome) = outcome_for(&details, &handle) {
                        break Some(outcome);
                    }
                }
                Ok(None) => {
                    break Some(WorkOutcome::Lost {
                        message: format!("Cluster has no record of submission {handle}"),
                    });
                }
                Err(e) => {
                    tracing::warn!(%job_id, handle = %handle, error = %e, "Cluster status poll failed");
                }
            }
        };

        self.watched.lock().await.remove(&handle);

        let Some(outcome) = outcome else {
            tracing::debug!(%job_id, handle = %handle, "Cluster poller stopped");
            return;
        };
        let signal = BackendSignal {
            job_id,
            handle: handle.clone(),
            outcome,
        };
        if self.signals.send(signal).await.is_err() {
            tracing::error!(%job_id, handle = %handle, "Completion channel closed, signal dropped");
        }
    }
}

// ---------------------------------------------------------------------------
// Status mapping
// ---------------------------------------------------------------------------

fn result_for(details: &JobDetails, handle: &BackendHandle) -> Value {
    json!({
        "results_uri": details.metadata.get(RESULTS_URI_KEY),
        "backend_job_id": handle.as_str(),
    })
}

fn failure_message(details: &JobDetails) -> String {
    match (&details.status, &details.message) {
        (_, Some(message)) if !message.is_empty() => message.clone(),
        (ClusterJobStatus::Stopped, _) => "Job was stopped on the cluster".to_string(),
        _ => "Job failed on the cluster".to_string(),
    }
}

/// Terminal outcome for a status, or `None` while the job is still active.
fn outcome_for(details: &JobDetails, handle: &BackendHandle) -> Option<WorkOutcome> {
    match details.status {
        ClusterJobStatus::Pending | ClusterJobStatus::Running => None,
        ClusterJobStatus::Succeeded => Some(WorkOutcome::Succeeded(result_for(details, handle))),
        ClusterJobStatus::Failed | ClusterJobStatus::Stopped => Some(WorkOutcome::Failed {
            message: failure_message(details),
            details: Some(json!({ "backend_job_id": handle.as_str() })),
        }),
    }
}

fn state_for(details: &JobDetails, handle: &BackendHandle) -> BackendJobState {
    match details.status {
        ClusterJobStatus::Pending => BackendJobState::Pending,
        ClusterJobStatus::Running => BackendJobState::Running,
        ClusterJobStatus::Succeeded => BackendJobState::Succeeded {
            result: result_for(details, handle),
        },
        ClusterJobStatus::Failed | ClusterJobStatus::Stopped => BackendJobState::Failed {
            message: failure_message(details),
        },
    }
}
