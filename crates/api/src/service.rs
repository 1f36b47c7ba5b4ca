//! Caller-facing job operations.
//!
//! [`JobService`] is the only entry point HTTP handlers use. It never waits
//! for a job to finish: creation returns as soon as the `PENDING` record is
//! stored, and the dispatcher picks it up asynchronously.

use std::sync::Arc;

use evalhub_core::backend::ExecutionBackend;
use evalhub_core::error::CoreError;
use evalhub_core::job::{validate_create_job, CreateJob, JobFilter, JobResultView, JobView};
use evalhub_core::lifecycle::Transition;
use evalhub_core::status::JobStatus;
use evalhub_core::types::JobId;
use evalhub_db::{JobStore, StoreError};
use evalhub_events::EventBus;
use tokio::sync::Notify;

pub struct JobService {
    store: Arc<dyn JobStore>,
    backend: Arc<dyn ExecutionBackend>,
    events: Arc<EventBus>,
    /// Wakes the dispatcher after a job is created.
    dispatch_wake: Arc<Notify>,
}

impl JobService {
    pub fn new(
        store: Arc<dyn JobStore>,
        backend: Arc<dyn ExecutionBackend>,
        events: Arc<EventBus>,
        dispatch_wake: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            backend,
            events,
            dispatch_wake,
        }
    }

    /// Validate and store a new `PENDING` job, then nudge the dispatcher.
    pub async fn create_job(&self, input: CreateJob) -> Result<JobView, StoreError> {
        validate_create_job(&input)?;
        let job = self.store.create(input).await?;

        tracing::info!(job_id = %job.id, job_type = %job.job_type, name = %job.name, "Job created");
        self.events.publish_job(&job);
        self.dispatch_wake.notify_one();

        Ok(JobView::from(job))
    }

    pub async fn get_job(&self, id: JobId) -> Result<JobView, StoreError> {
        Ok(JobView::from(self.store.get(id).await?))
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobView>, StoreError> {
        let jobs = self.store.list(filter).await?;
        Ok(jobs.into_iter().map(JobView::from).collect())
    }

    /// Cancel a `PENDING` or `RUNNING` job.
    ///
    /// `NotCancellable` if the job is already terminal, including when it
    /// became terminal while this call was running. A recorded backend
    /// handle is asked to stop; that request is best effort.
    pub async fn cancel_job(&self, id: JobId) -> Result<JobView, StoreError> {
        let job = match self.store.update(id, Transition::Cancel).await {
            Ok(job) => job,
            Err(StoreError::Core(CoreError::InvalidTransition { from, .. })) => {
                return Err(CoreError::NotCancellable { id, status: from }.into());
            }
            Err(e) => return Err(e),
        };

        tracing::info!(job_id = %id, "Job cancelled");
        self.events.publish_job(&job);

        if let Some(handle) = &job.backend_handle {
            if let Err(e) = self.backend.cancel(handle).await {
                tracing::warn!(
                    job_id = %id,
                    handle = %handle,
                    error = %e,
                    "Failed to stop backend work (job already marked cancelled)",
                );
            }
        }

        Ok(JobView::from(job))
    }

    /// The result payload of a `SUCCEEDED` job. `Conflict` otherwise.
    pub async fn get_result(&self, id: JobId) -> Result<JobResultView, StoreError> {
        let job = self.store.get(id).await?;
        match (job.status, job.result) {
            (JobStatus::Succeeded, Some(result)) => Ok(JobResultView {
                id: job.id,
                finished_at: job.finished_at,
                result,
            }),
            (status, _) => Err(CoreError::Conflict(format!(
                "Job {id} is {status}; results are only available once it has SUCCEEDED"
            ))
            .into()),
        }
    }

    /// Check the job store is reachable.
    pub async fn health_check(&self) -> Result<(), StoreError> {
        self.store.health_check().await
    }
}
