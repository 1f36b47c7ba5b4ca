//! Result collector.
//!
//! Consumes [`BackendSignal`]s and records terminal outcomes. Every signal
//! is applied at most once: a job that is already terminal is left alone,
//! which makes duplicate, late and post-cancel signals harmless.

use std::sync::Arc;

use evalhub_core::backend::{BackendSignal, SignalReceiver, WorkOutcome};
use evalhub_core::error::CoreError;
use evalhub_core::job::{Job, JobFailure};
use evalhub_core::lifecycle::Transition;
use evalhub_core::status::{FailureKind, JobStatus};
use evalhub_core::types::JobId;
use evalhub_db::{JobStore, StoreError};
use evalhub_events::EventBus;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Why a signal changed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The job had already reached this terminal status.
    AlreadyTerminal(JobStatus),
    /// The signal carries a handle other than the one recorded on the job.
    StaleHandle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CollectOutcome {
    Applied(Job),
    Ignored(IgnoreReason),
}

pub struct ResultCollector {
    store: Arc<dyn JobStore>,
    events: Arc<EventBus>,
}

impl ResultCollector {
    pub fn new(store: Arc<dyn JobStore>, events: Arc<EventBus>) -> Self {
        Self { store, events }
    }

    /// Consume the completion channel until it closes or `cancel` fires.
    pub async fn run(&self, mut signals: SignalReceiver, cancel: CancellationToken) {
        tracing::info!("Result collector started");
        loop {
            let signal = tokio::select! {
                _ = cancel.cancelled() => break,
                signal = signals.recv() => match signal {
                    Some(signal) => signal,
                    None => break,
                },
            };
            let job_id = signal.job_id;
            if let Err(e) = self.handle_signal(signal).await {
                tracing::error!(job_id = %job_id, error = %e, "Failed to record backend outcome");
            }
        }
        tracing::info!("Result collector shutting down");
    }

    /// Record one signal, after checking it belongs to the job's current
    /// submission.
    ///
    /// A job without a recorded handle accepts any signal: the backend can
    /// finish before the dispatcher has stored the handle.
    pub async fn handle_signal(&self, signal: BackendSignal) -> Result<CollectOutcome, StoreError> {
        let job = self.store.get(signal.job_id).await?;
        if job.status.is_terminal() {
            return Ok(self.ignore(job.id, IgnoreReason::AlreadyTerminal(job.status)));
        }
        if job
            .backend_handle
            .as_ref()
            .is_some_and(|recorded| *recorded != signal.handle)
        {
            tracing::warn!(
                job_id = %job.id,
                signal_handle = %signal.handle,
                "Dropping signal from a stale backend submission",
            );
            return Ok(CollectOutcome::Ignored(IgnoreReason::StaleHandle));
        }

        match signal.outcome {
            WorkOutcome::Succeeded(result) => self.on_complete(signal.job_id, result).await,
            WorkOutcome::Failed { message, details } => {
                let mut failure = JobFailure::new(FailureKind::ExecutionError, message);
                failure.details = details;
                self.on_failure(signal.job_id, failure).await
            }
            WorkOutcome::Lost { message } => {
                let failure = JobFailure::new(FailureKind::LostJob, message);
                self.on_failure(signal.job_id, failure).await
            }
        }
    }

    /// RUNNING -> SUCCEEDED with `result`. No-op for terminal jobs.
    ///
    /// A `null` result is recorded as an execution error instead.
    pub async fn on_complete(&self, id: JobId, result: Value) -> Result<CollectOutcome, StoreError> {
        if result.is_null() {
            tracing::warn!(job_id = %id, "Backend reported success without a result");
            let failure = JobFailure::new(
                FailureKind::ExecutionError,
                "Backend reported success without a result",
            );
            return self.on_failure(id, failure).await;
        }
        self.finish(id, Transition::Succeed { result }).await
    }

    /// RUNNING -> FAILED with `failure`. No-op for terminal jobs.
    pub async fn on_failure(
        &self,
        id: JobId,
        failure: JobFailure,
    ) -> Result<CollectOutcome, StoreError> {
        self.finish(id, Transition::Fail { failure }).await
    }

    async fn finish(&self, id: JobId, transition: Transition) -> Result<CollectOutcome, StoreError> {
        match self.store.update(id, transition).await {
            Ok(job) => {
                tracing::info!(job_id = %id, status = %job.status, "Job finished");
                self.events.publish_job(&job);
                Ok(CollectOutcome::Applied(job))
            }
            Err(StoreError::Core(CoreError::InvalidTransition { from, .. })) if from.is_terminal() => {
                Ok(self.ignore(id, IgnoreReason::AlreadyTerminal(from)))
            }
            Err(e) => Err(e),
        }
    }

    fn ignore(&self, id: JobId, reason: IgnoreReason) -> CollectOutcome {
        tracing::debug!(job_id = %id, ?reason, "Ignoring backend outcome");
        CollectOutcome::Ignored(reason)
    }
}
