//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub for [`JobEvent`]s. It is shared
//! via `Arc<EventBus>` between the API facade, the engine tasks and the
//! WebSocket handler.

use chrono::{DateTime, Utc};
use evalhub_core::job::Job;
use evalhub_core::job_events::event_type_for;
use evalhub_core::status::JobStatus;
use evalhub_core::types::JobId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// A job lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    /// Dot-separated event name, e.g. `"job.succeeded"`.
    pub event_type: String,

    pub job_id: JobId,

    /// Status the job entered.
    pub status: JobStatus,

    /// Event-specific data (job name, failure record, ...).
    pub payload: serde_json::Value,

    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    /// Create an event with an empty payload.
    pub fn new(event_type: impl Into<String>, job_id: JobId, status: JobStatus) -> Self {
        Self {
            event_type: event_type.into(),
            job_id,
            status,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    /// Build the event announcing the job's current status.
    ///
    /// The payload carries the job name and type, plus the failure record
    /// for failed jobs.
    pub fn for_job(job: &Job) -> Self {
        let mut payload = serde_json::json!({
            "name": job.name,
            "job_type": job.job_type,
        });
        if let Some(error) = &job.error {
            payload["error"] = serde_json::to_value(error).unwrap_or_default();
        }
        Self::new(event_type_for(job.status), job.id, job.status).with_payload(payload)
    }

    /// Set the JSON payload for the event.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// # Usage
///
/// ```rust
/// use evalhub_events::bus::{EventBus, JobEvent};
/// use evalhub_core::status::JobStatus;
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(JobEvent::new("job.created", uuid::Uuid::nil(), JobStatus::Pending));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers. Never blocks.
    pub fn publish(&self, event: JobEvent) {
        // A SendError only means there are zero receivers.
        if self.sender.send(event).is_err() {
            tracing::trace!("No event subscribers");
        }
    }

    /// Publish the status event for `job`.
    pub fn publish_job(&self, job: &Job) {
        self.publish(JobEvent::for_job(job));
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
