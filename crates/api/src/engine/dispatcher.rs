//! Background job dispatcher.
//!
//! Moves `PENDING` jobs to `RUNNING` and hands their work to the execution
//! backend, oldest first. Wakes on a poll interval or when a job is created.
//! On startup, and periodically for overdue jobs, reconciles `RUNNING` jobs
//! with what the backend actually knows.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use evalhub_backend::retry::submit_with_retry;
use evalhub_core::backend::{
    BackendJobState, BackendSignal, ExecutionBackend, SignalSender, WorkOutcome,
};
use evalhub_core::error::CoreError;
use evalhub_core::job::{Job, JobFailure, JobFilter};
use evalhub_core::lifecycle::Transition;
use evalhub_core::status::{FailureKind, JobStatus};
use evalhub_core::types::JobId;
use evalhub_db::{JobStore, StoreError};
use evalhub_events::EventBus;
use futures::StreamExt;
use serde_json::json;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;

/// What reconciliation did with one `RUNNING` job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// Marked `FAILED` with `LOST_JOB`.
    Lost,
    /// Still active on the backend; watching it again.
    Watching,
    /// Backend already finished; outcome forwarded to the collector.
    Forwarded,
    /// Submission in flight in this process, or the job left `RUNNING`.
    Skipped,
    /// Backend could not be asked; left for the next sweep.
    Unreachable,
}

/// Counts from one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    pub lost: usize,
    pub watching: usize,
    pub forwarded: usize,
    pub skipped: usize,
    pub unreachable: usize,
}

impl RecoveryReport {
    fn record(&mut self, outcome: Reconciled) {
        match outcome {
            Reconciled::Lost => self.lost += 1,
            Reconciled::Watching => self.watching += 1,
            Reconciled::Forwarded => self.forwarded += 1,
            Reconciled::Skipped => self.skipped += 1,
            Reconciled::Unreachable => self.unreachable += 1,
        }
    }
}

/// Job ids with a submission running in this process.
#[derive(Default)]
struct InFlight(Mutex<HashSet<JobId>>);

impl InFlight {
    fn lock(&self) -> MutexGuard<'_, HashSet<JobId>> {
        // The set stays consistent even if a holder panicked.
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn claim(&self, id: JobId) -> Option<InFlightGuard<'_>> {
        self.lock().insert(id).then_some(InFlightGuard { set: self, id })
    }

    fn contains(&self, id: JobId) -> bool {
        self.lock().contains(&id)
    }
}

/// Releases the in-flight claim on drop.
struct InFlightGuard<'a> {
    set: &'a InFlight,
    id: JobId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
    }
}

/// Background job dispatcher.
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    backend: Arc<dyn ExecutionBackend>,
    events: Arc<EventBus>,
    /// Sender side of the completion channel, for outcomes found during
    /// reconciliation.
    signals: SignalSender,
    config: EngineConfig,
    in_flight: InFlight,
    wake: Arc<Notify>,
    /// Stops the run loop and any submission backoff.
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        backend: Arc<dyn ExecutionBackend>,
        events: Arc<EventBus>,
        signals: SignalSender,
        config: EngineConfig,
        wake: Arc<Notify>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            backend,
            events,
            signals,
            config,
            in_flight: InFlight::default(),
            wake,
            cancel,
        }
    }

    /// Run recovery once, then the dispatch loop until cancelled.
    pub async fn run(&self) {
        match self.recover().await {
            Ok(report) => tracing::info!(?report, "Startup recovery finished"),
            Err(e) => tracing::error!(error = %e, "Startup recovery failed"),
        }

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        // Recovery just covered every RUNNING job.
        sweep.reset();

        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            sweep_interval_secs = self.config.sweep_interval.as_secs(),
            backend = self.backend.name(),
            "Job dispatcher started",
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Job dispatcher shutting down");
                    break;
                }
                _ = ticker.tick() => self.dispatch_cycle().await,
                _ = self.wake.notified() => self.dispatch_cycle().await,
                _ = sweep.tick() => {
                    match self.sweep_overdue().await {
                        Ok(report) if report != RecoveryReport::default() => {
                            tracing::info!(?report, "Overdue sweep finished");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Overdue sweep failed"),
                    }
                }
            }
        }
    }

    async fn dispatch_cycle(&self) {
        if let Err(e) = self.dispatch_pending().await {
            tracing::error!(error = %e, "Dispatch cycle failed");
        }
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// One dispatch cycle. Returns how many jobs were handed to the backend.
    pub async fn dispatch_pending(&self) -> Result<usize, StoreError> {
        let filter = JobFilter {
            status: Some(JobStatus::Pending),
            limit: Some(self.config.batch_size),
            ..Default::default()
        };
        let pending = self.store.list(&filter).await?;
        if pending.is_empty() {
            return Ok(0);
        }
        tracing::debug!(count = pending.len(), "Dispatching pending jobs");

        let submitted = futures::stream::iter(pending)
            .map(|job| async move { self.submit(job.id).await })
            .buffer_unordered(self.config.concurrency.max(1))
            .filter_map(|result| async move {
                match result {
                    Ok(job) => job.backend_handle.is_some().then_some(()),
                    Err(StoreError::Core(CoreError::AlreadyDispatched(id))) => {
                        tracing::debug!(job_id = %id, "Job already dispatched elsewhere, skipping");
                        None
                    }
                    Err(StoreError::Core(e @ CoreError::InvalidTransition { .. })) => {
                        tracing::debug!(error = %e, "Job left PENDING before dispatch, skipping");
                        None
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to dispatch job");
                        None
                    }
                }
            })
            .count()
            .await;

        Ok(submitted)
    }

    /// Move one job to `RUNNING` and submit its work.
    ///
    /// Returns the job as stored afterwards: `RUNNING` with a handle,
    /// `FAILED` with `SUBMISSION_ERROR`, or `CANCELLED` if a cancel won the
    /// race against the submission.
    ///
    /// `AlreadyDispatched` if another submission for the job is in flight
    /// or the job is already `RUNNING`; `InvalidTransition` if it is terminal.
    pub async fn submit(&self, id: JobId) -> Result<Job, StoreError> {
        let _claim = self
            .in_flight
            .claim(id)
            .ok_or(CoreError::AlreadyDispatched(id))?;

        let job = match self.store.update(id, Transition::Start).await {
            Ok(job) => job,
            Err(StoreError::Core(CoreError::InvalidTransition {
                from: JobStatus::Running,
                ..
            })) => return Err(CoreError::AlreadyDispatched(id).into()),
            Err(e) => return Err(e),
        };
        self.events.publish_job(&job);

        let submission = submit_with_retry(
            self.backend.as_ref(),
            job.id,
            job.job_type,
            &job.spec,
            &self.config.retry,
            &self.cancel,
        )
        .await;

        match submission {
            Ok(handle) => {
                let job = self.store.attach_handle(id, &handle).await?;
                if job.status.is_terminal() {
                    tracing::info!(
                        job_id = %id,
                        handle = %handle,
                        status = %job.status,
                        "Job finished during submission, stopping backend work",
                    );
                    if let Err(e) = self.backend.cancel(&handle).await {
                        tracing::warn!(job_id = %id, handle = %handle, error = %e, "Failed to stop backend work");
                    }
                } else {
                    tracing::info!(job_id = %id, handle = %handle, "Job submitted to backend");
                }
                Ok(job)
            }
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Submission failed");
                let failure = JobFailure::new(FailureKind::SubmissionError, e.to_string())
                    .with_details(json!({
                        "backend": self.backend.name(),
                        "transient": e.is_transient(),
                    }));
                self.fail_running(id, failure).await
            }
        }
    }

    // -----------------------------------------------------------------------
    // Recovery
    // -----------------------------------------------------------------------

    /// Reconcile every `RUNNING` job with the backend. Run once at startup.
    pub async fn recover(&self) -> Result<RecoveryReport, StoreError> {
        let running = self.store.list(&JobFilter::with_status(JobStatus::Running)).await?;
        tracing::info!(count = running.len(), "Recovering RUNNING jobs");
        self.reconcile_all(running).await
    }

    /// Reconcile `RUNNING` jobs started longer than the deadline ago.
    pub async fn sweep_overdue(&self) -> Result<RecoveryReport, StoreError> {
        let deadline = chrono::Duration::from_std(self.config.running_deadline)
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(deadline)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let filter = JobFilter {
            status: Some(JobStatus::Running),
            started_before: Some(cutoff),
            ..Default::default()
        };
        let overdue = self.store.list(&filter).await?;
        self.reconcile_all(overdue).await
    }

    async fn reconcile_all(&self, jobs: Vec<Job>) -> Result<RecoveryReport, StoreError> {
        let mut report = RecoveryReport::default();
        for job in jobs {
            report.record(self.reconcile(&job).await?);
        }
        Ok(report)
    }

    /// Bring one `RUNNING` job in line with the backend.
    ///
    /// No handle, or a handle the backend does not know, means the work is
    /// gone: the job fails with `LOST_JOB` and is never resubmitted.
    pub async fn reconcile(&self, job: &Job) -> Result<Reconciled, StoreError> {
        if job.status != JobStatus::Running || self.in_flight.contains(job.id) {
            return Ok(Reconciled::Skipped);
        }

        let Some(handle) = &job.backend_handle else {
            let failure = JobFailure::new(
                FailureKind::LostJob,
                "Job was RUNNING without a recorded backend submission",
            );
            self.fail_running(job.id, failure).await?;
            return Ok(Reconciled::Lost);
        };

        let state = match self.backend.lookup(handle).await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(job_id = %job.id, handle = %handle, error = %e, "Backend lookup failed");
                return Ok(Reconciled::Unreachable);
            }
        };

        let outcome = match state {
            None => {
                let failure = JobFailure::new(
                    FailureKind::LostJob,
                    format!("Backend has no record of submission {handle}"),
                )
                .with_details(json!({ "backend": self.backend.name() }));
                self.fail_running(job.id, failure).await?;
                return Ok(Reconciled::Lost);
            }
            Some(state) if state.is_active() => {
                if let Err(e) = self.backend.watch(job.id, handle).await {
                    tracing::warn!(job_id = %job.id, handle = %handle, error = %e, "Failed to resume watching");
                    return Ok(Reconciled::Unreachable);
                }
                tracing::info!(job_id = %job.id, handle = %handle, "Resumed watching backend work");
                return Ok(Reconciled::Watching);
            }
            Some(BackendJobState::Succeeded { result }) => WorkOutcome::Succeeded(result),
            Some(BackendJobState::Failed { message }) => WorkOutcome::Failed {
                message,
                details: None,
            },
            Some(BackendJobState::Pending | BackendJobState::Running) => {
                return Ok(Reconciled::Skipped);
            }
        };

        let signal = BackendSignal {
            job_id: job.id,
            handle: handle.clone(),
            outcome,
        };
        if self.signals.send(signal).await.is_err() {
            tracing::error!(job_id = %job.id, "Completion channel closed, outcome not forwarded");
            return Ok(Reconciled::Unreachable);
        }
        tracing::info!(job_id = %job.id, handle = %handle, "Forwarded finished backend outcome");
        Ok(Reconciled::Forwarded)
    }

    /// RUNNING -> FAILED. A job that left `RUNNING` meanwhile is returned
    /// as it is.
    async fn fail_running(&self, id: JobId, failure: JobFailure) -> Result<Job, StoreError> {
        let kind = failure.kind;
        match self.store.update(id, Transition::Fail { failure }).await {
            Ok(job) => {
                tracing::warn!(job_id = %id, kind = %kind, "Job failed");
                self.events.publish_job(&job);
                Ok(job)
            }
            Err(StoreError::Core(CoreError::InvalidTransition { from, .. })) => {
                tracing::info!(job_id = %id, status = %from, "Job already left RUNNING, not marking failed");
                self.store.get(id).await
            }
            Err(e) => Err(e),
        }
    }
}
