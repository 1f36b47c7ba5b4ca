//! PostgreSQL job store for the `jobs` table.
//!
//! Status, type and failure kind are stored as SMALLINT lookup ids from
//! `evalhub_core::status`. Transitions are validated in Rust against the row
//! locked with `SELECT ... FOR UPDATE`, so two writers on one job serialize
//! and the loser sees the winner's state.

use async_trait::async_trait;
use chrono::Utc;
use evalhub_core::backend::BackendHandle;
use evalhub_core::error::CoreError;
use evalhub_core::job::{CreateJob, HandleAttach, Job, JobFilter};
use evalhub_core::lifecycle::Transition;
use evalhub_core::types::{new_job_id, JobId};
use sqlx::{PgConnection, PgPool};

use crate::error::StoreError;
use crate::models::job::JobRow;
use crate::store::JobStore;

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, job_type_id, name, description, status_id, spec, result, \
    error_kind_id, error_message, error_details, backend_handle, \
    created_at, started_at, finished_at, updated_at";

/// [`JobStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Lock the row, run `f` on the mapped job, and write the job back if
    /// `f` reports a change. Any error rolls the transaction back.
    async fn mutate<F>(&self, id: JobId, f: F) -> Result<Job, StoreError>
    where
        F: FnOnce(&mut Job) -> Result<bool, CoreError> + Send,
    {
        let mut tx = self.pool.begin().await?;

        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(CoreError::job_not_found(id))?;

        let mut job = Job::try_from(row)?;
        if f(&mut job)? {
            write_back(&mut *tx, &job).await?;
        }
        tx.commit().await?;
        Ok(job)
    }
}

/// Persist every mutable column of `job`.
async fn write_back(conn: &mut PgConnection, job: &Job) -> Result<(), sqlx::Error> {
    let (kind_id, message, details) = match &job.error {
        Some(e) => (Some(e.kind.id()), Some(e.message.as_str()), e.details.as_ref()),
        None => (None, None, None),
    };
    sqlx::query(
        "UPDATE jobs \
         SET status_id = $2, result = $3, error_kind_id = $4, error_message = $5, \
             error_details = $6, backend_handle = $7, started_at = $8, \
             finished_at = $9, updated_at = $10 \
         WHERE id = $1",
    )
    .bind(job.id)
    .bind(job.status.id())
    .bind(&job.result)
    .bind(kind_id)
    .bind(message)
    .bind(details)
    .bind(job.backend_handle.as_ref().map(BackendHandle::as_str))
    .bind(job.started_at)
    .bind(job.finished_at)
    .bind(job.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, input: CreateJob) -> Result<Job, StoreError> {
        let job = Job::new(new_job_id(), input, Utc::now());
        let query = format!(
            "INSERT INTO jobs \
                 (id, job_type_id, name, description, status_id, spec, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(job.id)
            .bind(job.job_type.id())
            .bind(&job.name)
            .bind(&job.description)
            .bind(job.status.id())
            .bind(&job.spec)
            .bind(job.created_at)
            .bind(job.updated_at)
            .fetch_one(&self.pool)
            .await?;
        Job::try_from(row)
    }

    async fn get(&self, id: JobId) -> Result<Job, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(CoreError::job_not_found(id))?;
        Job::try_from(row)
    }

    async fn update(&self, id: JobId, transition: Transition) -> Result<Job, StoreError> {
        self.mutate(id, |job| job.apply(transition, Utc::now()).map(|()| true))
            .await
    }

    async fn attach_handle(&self, id: JobId, handle: &BackendHandle) -> Result<Job, StoreError> {
        self.mutate(id, |job| {
            let unchanged = job.backend_handle.as_ref() == Some(handle);
            let outcome = job.attach_handle(handle, Utc::now())?;
            Ok(outcome == HandleAttach::Attached && !unchanged)
        })
        .await
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        // Build the WHERE clause and track the next bind parameter index.
        let mut conditions: Vec<String> = Vec::new();
        let mut bind_idx: u32 = 1;

        if filter.status.is_some() {
            conditions.push(format!("status_id = ${bind_idx}"));
            bind_idx += 1;
        }
        if filter.job_type.is_some() {
            conditions.push(format!("job_type_id = ${bind_idx}"));
            bind_idx += 1;
        }
        if filter.started_before.is_some() {
            conditions.push(format!("started_at < ${bind_idx}"));
            bind_idx += 1;
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        // LIMIT NULL means no limit in PostgreSQL.
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             {where_clause} \
             ORDER BY created_at ASC, id ASC \
             LIMIT ${bind_idx} OFFSET ${}",
            bind_idx + 1,
        );

        let mut q = sqlx::query_as::<_, JobRow>(&query);
        if let Some(status) = filter.status {
            q = q.bind(status.id());
        }
        if let Some(job_type) = filter.job_type {
            q = q.bind(job_type.id());
        }
        if let Some(cutoff) = filter.started_before {
            q = q.bind(cutoff);
        }
        q = q.bind(filter.limit).bind(filter.offset.unwrap_or(0));

        q.fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Job::try_from)
            .collect()
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        crate::health_check(&self.pool).await?;
        Ok(())
    }
}
