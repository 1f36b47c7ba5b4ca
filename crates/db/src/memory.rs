//! In-memory job store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use evalhub_core::backend::BackendHandle;
use evalhub_core::error::CoreError;
use evalhub_core::job::{CreateJob, Job, JobFilter};
use evalhub_core::lifecycle::Transition;
use evalhub_core::types::{new_job_id, JobId};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::JobStore;

/// [`JobStore`] over a `RwLock<HashMap>`.
///
/// Mutations run on a copy of the job under the write lock and swap it in
/// only when the transition succeeds.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a job as-is, bypassing the lifecycle. Used to seed state
    /// that survived a restart.
    pub async fn insert(&self, job: Job) {
        self.jobs.write().await.insert(job.id, job);
    }

    async fn mutate<F>(&self, id: JobId, f: F) -> Result<Job, StoreError>
    where
        F: FnOnce(&mut Job) -> Result<(), CoreError> + Send,
    {
        let mut jobs = self.jobs.write().await;
        let current = jobs.get(&id).ok_or(CoreError::job_not_found(id))?;
        let mut next = current.clone();
        f(&mut next)?;
        jobs.insert(id, next.clone());
        Ok(next)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, input: CreateJob) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().await;
        let mut id = new_job_id();
        while jobs.contains_key(&id) {
            id = new_job_id();
        }
        let job = Job::new(id, input, Utc::now());
        jobs.insert(id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Job, StoreError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::job_not_found(id).into())
    }

    async fn update(&self, id: JobId, transition: Transition) -> Result<Job, StoreError> {
        self.mutate(id, |job| job.apply(transition, Utc::now())).await
    }

    async fn attach_handle(&self, id: JobId, handle: &BackendHandle) -> Result<Job, StoreError> {
        self.mutate(id, |job| job.attach_handle(handle, Utc::now()).map(|_| ()))
            .await
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<Job> = jobs.values().filter(|j| filter.matches(j)).cloned().collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = filter.limit.map_or(usize::MAX, |l| l.max(0) as usize);
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
