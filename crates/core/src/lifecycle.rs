//! Job lifecycle state machine.
//!
//! ```text
//!   create ──→ PENDING ──→ RUNNING ──→ SUCCEEDED
//!                 │           │
//!                 │           └──→ FAILED
//!                 │           │
//!                 └───────────┴──→ CANCELLED
//! ```
//!
//! Terminal states (`SUCCEEDED`, `FAILED`, `CANCELLED`) have no outgoing
//! edges. Every mutation of a job goes through [`Transition`] so the store
//! can reject illegal edges before touching any field.

use serde_json::Value;

use crate::error::CoreError;
use crate::job::JobFailure;
use crate::status::JobStatus;
use crate::types::JobId;

impl JobStatus {
    /// `true` for states with no outgoing edges.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Pending, Cancelled)
                | (Running, Cancelled)
        )
    }
}

/// A requested state change, carrying the data the target state needs.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// PENDING -> RUNNING. Sets `started_at`.
    Start,
    /// RUNNING -> SUCCEEDED with the backend's result payload.
    Succeed { result: Value },
    /// RUNNING -> FAILED with the failure record.
    Fail { failure: JobFailure },
    /// PENDING | RUNNING -> CANCELLED.
    Cancel,
}

impl Transition {
    /// The state this transition moves a job into.
    pub fn target(&self) -> JobStatus {
        match self {
            Transition::Start => JobStatus::Running,
            Transition::Succeed { .. } => JobStatus::Succeeded,
            Transition::Fail { .. } => JobStatus::Failed,
            Transition::Cancel => JobStatus::Cancelled,
        }
    }
}

/// Reject `from -> to` unless it is a lifecycle edge.
pub fn check_transition(id: JobId, from: JobStatus, to: JobStatus) -> Result<(), CoreError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition { id, from, to })
    }
}
