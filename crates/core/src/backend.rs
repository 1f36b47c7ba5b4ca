//! Execution backend capability.
//!
//! A backend is anything that can "accept work, then deliver exactly one
//! terminal signal" -- a batch cluster or an online serving deployment.
//! Submission returns a [`BackendHandle`]; the outcome arrives later as a
//! [`BackendSignal`] on the completion channel created by
//! [`completion_channel`], which the result collector consumes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::status::JobType;
use crate::types::JobId;

/// Buffer capacity of the completion channel.
pub const COMPLETION_CHANNEL_CAPACITY: usize = 256;

/// Opaque backend-issued reference correlating submitted work with its
/// completion signal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendHandle(String);

impl BackendHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a backend knows about a handle when asked directly.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendJobState {
    Pending,
    Running,
    Succeeded { result: Value },
    Failed { message: String },
}

impl BackendJobState {
    /// `true` while the backend is still working on it.
    pub fn is_active(&self) -> bool {
        matches!(self, BackendJobState::Pending | BackendJobState::Running)
    }
}

/// Terminal outcome of a unit of work.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkOutcome {
    Succeeded(Value),
    Failed {
        message: String,
        details: Option<Value>,
    },
    /// The backend dropped its record of the work before it finished.
    Lost { message: String },
}

/// One message on the completion channel.
#[derive(Debug, Clone)]
pub struct BackendSignal {
    pub job_id: JobId,
    pub handle: BackendHandle,
    pub outcome: WorkOutcome,
}

pub type SignalSender = mpsc::Sender<BackendSignal>;
pub type SignalReceiver = mpsc::Receiver<BackendSignal>;

/// Create the completion channel shared by backends (senders) and the
/// result collector (receiver).
pub fn completion_channel() -> (SignalSender, SignalReceiver) {
    mpsc::channel(COMPLETION_CHANNEL_CAPACITY)
}

/// Errors from a backend call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// The backend refused the request. Retrying will not help.
    #[error("Backend rejected the request: {0}")]
    Rejected(String),

    /// Network failure, timeout or 5xx. Worth retrying.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with something we could not interpret.
    #[error("Unexpected backend response: {0}")]
    Protocol(String),
}

impl BackendError {
    /// Whether the dispatcher may retry the call.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }
}

/// Capability interface implemented by every execution substrate.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Short name for logs (`cluster`, `serving`, ...).
    fn name(&self) -> &'static str;

    /// Hand the work to the backend. On success the backend owns delivering
    /// exactly one [`BackendSignal`] for the returned handle.
    async fn submit_work(
        &self,
        job_id: JobId,
        job_type: JobType,
        spec: &Value,
    ) -> Result<BackendHandle, BackendError>;

    /// Ask the backend about a handle. `Ok(None)` means it has no record.
    async fn lookup(&self, handle: &BackendHandle)
        -> Result<Option<BackendJobState>, BackendError>;

    /// Resume delivering the completion signal for a handle submitted by an
    /// earlier process.
    async fn watch(&self, job_id: JobId, handle: &BackendHandle) -> Result<(), BackendError>;

    /// Best-effort request to stop work. Cancellation is cooperative.
    async fn cancel(&self, handle: &BackendHandle) -> Result<(), BackendError>;
}
