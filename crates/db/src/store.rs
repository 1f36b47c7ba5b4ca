use async_trait::async_trait;
use evalhub_core::backend::BackendHandle;
use evalhub_core::job::{CreateJob, Job, JobFilter};
use evalhub_core::lifecycle::Transition;
use evalhub_core::types::JobId;

use crate::error::StoreError;

/// Durable mapping from job id to job record.
///
/// Every mutation is an atomic read-modify-write on a single job: the
/// transition is validated against the current state and either applied in
/// full or rejected with the job unchanged. Readers never observe a partial
/// update.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new `PENDING` job with a fresh id.
    async fn create(&self, input: CreateJob) -> Result<Job, StoreError>;

    /// Fetch a job. `CoreError::NotFound` for unknown ids.
    async fn get(&self, id: JobId) -> Result<Job, StoreError>;

    /// Apply a lifecycle transition. `CoreError::InvalidTransition` if the
    /// edge is not legal from the job's current status.
    async fn update(&self, id: JobId, transition: Transition) -> Result<Job, StoreError>;

    /// Record the backend handle of a running job.
    ///
    /// A no-op returning the job unchanged when the job is already terminal.
    /// `CoreError::Conflict` for a `PENDING` job or a different handle.
    async fn attach_handle(&self, id: JobId, handle: &BackendHandle) -> Result<Job, StoreError>;

    /// List jobs matching `filter`, oldest first.
    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError>;

    /// Check the store is reachable.
    async fn health_check(&self) -> Result<(), StoreError>;
}
