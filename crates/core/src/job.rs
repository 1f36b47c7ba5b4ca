//! Job entity, DTOs and the pure mutation logic shared by every store.
//!
//! Stores never mutate fields directly: they call [`Job::apply`] or
//! [`Job::attach_handle`] on a copy and persist the copy only if the call
//! succeeded, so a failed transition leaves the stored job untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::BackendHandle;
use crate::error::CoreError;
use crate::lifecycle::{check_transition, Transition};
use crate::status::{FailureKind, JobStatus, JobType};
use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum length of a job name.
pub const MAX_NAME_LEN: usize = 255;

/// Maximum length of a job description.
pub const MAX_DESCRIPTION_LEN: usize = 2000;

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// Failure record stored on a `FAILED` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// A unit of evaluation work tracked end-to-end.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub name: String,
    pub description: Option<String>,
    pub status: JobStatus,
    pub spec: Value,
    pub result: Option<Value>,
    pub error: Option<JobFailure>,
    pub backend_handle: Option<BackendHandle>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

/// Outcome of [`Job::attach_handle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleAttach {
    /// The handle is now recorded on the running job.
    Attached,
    /// The job reached a terminal state first; nothing was recorded.
    Terminal,
}

impl Job {
    /// Build a fresh `PENDING` job from a validated request.
    pub fn new(id: JobId, input: CreateJob, now: Timestamp) -> Self {
        Self {
            id,
            job_type: input.job_type,
            name: input.name.trim().to_string(),
            description: input.description,
            status: JobStatus::Pending,
            spec: input.spec,
            result: None,
            error: None,
            backend_handle: None,
            created_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
        }
    }

    /// Apply a lifecycle transition.
    ///
    /// Validates the edge first; on error nothing is modified. Timestamps
    /// are clamped to the last mutation time so they never go backwards,
    /// even if the wall clock does.
    ///
    /// A JSON `null` result is refused: it would serialize the same as "no
    /// result" and leave a SUCCEEDED job with neither result nor error.
    pub fn apply(&mut self, transition: Transition, now: Timestamp) -> Result<(), CoreError> {
        let to = transition.target();
        check_transition(self.id, self.status, to)?;
        if let Transition::Succeed { result: Value::Null } = &transition {
            return Err(CoreError::Validation(format!(
                "Job {} cannot succeed with a null result",
                self.id
            )));
        }

        let stamp = now.max(self.updated_at);
        match transition {
            Transition::Start => self.started_at = Some(stamp),
            Transition::Succeed { result } => {
                self.result = Some(result);
                self.finished_at = Some(stamp);
            }
            Transition::Fail { failure } => {
                self.error = Some(failure);
                self.finished_at = Some(stamp);
            }
            Transition::Cancel => self.finished_at = Some(stamp),
        }
        self.status = to;
        self.updated_at = stamp;
        Ok(())
    }

    /// Record the backend handle of a running job.
    ///
    /// Terminal jobs are left untouched and report [`HandleAttach::Terminal`],
    /// which tells the dispatcher a cancel won the race against submission.
    pub fn attach_handle(
        &mut self,
        handle: &BackendHandle,
        now: Timestamp,
    ) -> Result<HandleAttach, CoreError> {
        if self.status.is_terminal() {
            return Ok(HandleAttach::Terminal);
        }
        if self.status != JobStatus::Running {
            return Err(CoreError::Conflict(format!(
                "Job {} is {} and has no submission to attach",
                self.id, self.status
            )));
        }
        match &self.backend_handle {
            Some(existing) if existing == handle => Ok(HandleAttach::Attached),
            Some(existing) => Err(CoreError::Conflict(format!(
                "Job {} is already attached to backend handle {existing}",
                self.id
            ))),
            None => {
                self.backend_handle = Some(handle.clone());
                self.updated_at = now.max(self.updated_at);
                Ok(HandleAttach::Attached)
            }
        }
    }

    /// Verify the field invariants tied to `status`.
    ///
    /// - exactly one of `result`/`error` when SUCCEEDED/FAILED, neither otherwise;
    /// - `finished_at` set iff terminal, `started_at` set once running;
    /// - timestamps non-decreasing.
    pub fn check_invariants(&self) -> Result<(), String> {
        let (want_result, want_error) = match self.status {
            JobStatus::Succeeded => (true, false),
            JobStatus::Failed => (false, true),
            _ => (false, false),
        };
        let has_result = self.result.as_ref().is_some_and(|r| !r.is_null());
        if has_result != want_result {
            return Err(format!("result presence does not match status {}", self.status));
        }
        if self.error.is_some() != want_error {
            return Err(format!("error presence does not match status {}", self.status));
        }
        if self.finished_at.is_some() != self.status.is_terminal() {
            return Err(format!("finished_at presence does not match status {}", self.status));
        }
        let must_have_started = matches!(
            self.status,
            JobStatus::Running | JobStatus::Succeeded | JobStatus::Failed
        );
        if must_have_started && self.started_at.is_none() {
            return Err(format!("started_at missing for status {}", self.status));
        }
        if let Some(started) = self.started_at {
            if started < self.created_at {
                return Err("started_at precedes created_at".into());
            }
        }
        if let Some(finished) = self.finished_at {
            if finished < self.started_at.unwrap_or(self.created_at) {
                return Err("finished_at precedes started_at".into());
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

/// DTO for creating a job via `POST /api/v1/jobs`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateJob {
    pub job_type: JobType,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Opaque model/dataset/metrics configuration. Must be a JSON object.
    pub spec: Value,
}

/// Caller-facing projection of a [`Job`]. The backend handle stays internal.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub id: JobId,
    pub job_type: JobType,
    pub name: String,
    pub description: Option<String>,
    pub status: JobStatus,
    pub spec: Value,
    pub result: Option<Value>,
    pub error: Option<JobFailure>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            job_type: job.job_type,
            name: job.name.clone(),
            description: job.description.clone(),
            status: job.status,
            spec: job.spec.clone(),
            result: job.result.clone(),
            error: job.error.clone(),
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            job_type: job.job_type,
            name: job.name,
            description: job.description,
            status: job.status,
            spec: job.spec,
            result: job.result,
            error: job.error,
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

/// Result payload of a `SUCCEEDED` job.
#[derive(Debug, Clone, Serialize)]
pub struct JobResultView {
    pub id: JobId,
    pub finished_at: Option<Timestamp>,
    pub result: Value,
}

/// Listing filter. Results are ordered by `created_at` ascending.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
    /// Only jobs whose `started_at` is strictly earlier than this.
    pub started_before: Option<Timestamp>,
    /// `None` returns every matching job.
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl JobFilter {
    /// Filter on a single status.
    pub fn with_status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Whether `job` passes the predicate part of the filter (ignores paging).
    pub fn matches(&self, job: &Job) -> bool {
        self.status.is_none_or(|s| s == job.status)
            && self.job_type.is_none_or(|t| t == job.job_type)
            && self
                .started_before
                .is_none_or(|cutoff| job.started_at.is_some_and(|s| s < cutoff))
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a job creation request.
///
/// Rules:
/// - `name` must not be blank and must not exceed `MAX_NAME_LEN` characters.
/// - `description`, if present, must not exceed `MAX_DESCRIPTION_LEN` characters.
/// - `spec` must be a JSON object.
pub fn validate_create_job(input: &CreateJob) -> Result<(), CoreError> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(CoreError::Validation("Job name must not be empty".to_string()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "Job name must not exceed {MAX_NAME_LEN} characters"
        )));
    }
    if let Some(description) = &input.description {
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(CoreError::Validation(format!(
                "Job description must not exceed {MAX_DESCRIPTION_LEN} characters"
            )));
        }
    }
    if !input.spec.is_object() {
        return Err(CoreError::Validation(
            "Job spec must be a JSON object".to_string(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
