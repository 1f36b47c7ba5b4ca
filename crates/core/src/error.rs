use crate::status::JobStatus;
use crate::types::JobId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: JobId },

    #[error("Invalid transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job {0} is already dispatched")]
    AlreadyDispatched(JobId),

    #[error("Job {id} is {status} and cannot be cancelled")]
    NotCancellable { id: JobId, status: JobStatus },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Shorthand for a missing job.
    pub fn job_not_found(id: JobId) -> Self {
        CoreError::NotFound { entity: "Job", id }
    }
}
