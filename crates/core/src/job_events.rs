//! Event type names for job lifecycle events.
//!
//! Published on the event bus by the API facade, dispatcher and result
//! collector, and forwarded verbatim to WebSocket clients.

use crate::status::JobStatus;

/// Job was created and is waiting for dispatch.
pub const EVENT_JOB_CREATED: &str = "job.created";

/// Job was handed to the execution backend.
pub const EVENT_JOB_RUNNING: &str = "job.running";

/// Job completed successfully.
pub const EVENT_JOB_SUCCEEDED: &str = "job.succeeded";

/// Job failed (submission error, lost job or execution error).
pub const EVENT_JOB_FAILED: &str = "job.failed";

/// Job was cancelled by a caller.
pub const EVENT_JOB_CANCELLED: &str = "job.cancelled";

/// Event type announcing that a job entered `status`.
pub fn event_type_for(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => EVENT_JOB_CREATED,
        JobStatus::Running => EVENT_JOB_RUNNING,
        JobStatus::Succeeded => EVENT_JOB_SUCCEEDED,
        JobStatus::Failed => EVENT_JOB_FAILED,
        JobStatus::Cancelled => EVENT_JOB_CANCELLED,
    }
}
