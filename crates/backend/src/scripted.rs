//! In-process backend driven by the test.
//!
//! Records every submission and lets the caller decide when and how each
//! unit of work finishes, when a record disappears, and which submissions
//! fail. Used by the engine and HTTP tests.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use evalhub_core::backend::{
    BackendError, BackendHandle, BackendJobState, BackendSignal, ExecutionBackend, SignalSender,
    WorkOutcome,
};
use evalhub_core::status::JobType;
use evalhub_core::types::JobId;
use serde_json::Value;
use tokio::sync::Mutex;

/// One accepted `submit_work` call.
#[derive(Debug, Clone)]
pub struct Submission {
    pub job_id: JobId,
    pub job_type: JobType,
    pub spec: Value,
    pub handle: BackendHandle,
}

#[derive(Default)]
struct ScriptState {
    next_seq: u64,
    attempts: u32,
    submit_failures: VecDeque<BackendError>,
    submit_delay: Option<Duration>,
    submissions: Vec<Submission>,
    records: HashMap<BackendHandle, (JobId, BackendJobState)>,
    watched: Vec<BackendHandle>,
    cancelled: Vec<BackendHandle>,
}

impl ScriptState {
    fn allocate_handle(&mut self) -> BackendHandle {
        self.next_seq += 1;
        BackendHandle::new(format!("scripted-{}", self.next_seq))
    }
}

/// Scriptable [`ExecutionBackend`].
pub struct ScriptedBackend {
    signals: SignalSender,
    state: Mutex<ScriptState>,
}

impl ScriptedBackend {
    pub fn new(signals: SignalSender) -> Self {
        Self {
            signals,
            state: Mutex::new(ScriptState::default()),
        }
    }

    /// Make the next `submit_work` call fail with `error`. Queued in order.
    pub async fn fail_next_submit(&self, error: BackendError) {
        self.state.lock().await.submit_failures.push_back(error);
    }

    /// Hold every subsequent `submit_work` call for `delay` before answering.
    pub async fn set_submit_delay(&self, delay: Duration) {
        self.state.lock().await.submit_delay = Some(delay);
    }

    /// Number of `submit_work` calls so far, failed ones included.
    pub async fn submit_attempts(&self) -> u32 {
        self.state.lock().await.attempts
    }

    pub async fn submissions(&self) -> Vec<Submission> {
        self.state.lock().await.submissions.clone()
    }

    /// Handle of the most recent accepted submission for `job_id`.
    pub async fn handle_for(&self, job_id: JobId) -> Option<BackendHandle> {
        self.state
            .lock()
            .await
            .submissions
            .iter()
            .rev()
            .find(|s| s.job_id == job_id)
            .map(|s| s.handle.clone())
    }

    /// Handles passed to `watch`.
    pub async fn watched(&self) -> Vec<BackendHandle> {
        self.state.lock().await.watched.clone()
    }

    /// Handles passed to `cancel`.
    pub async fn cancelled(&self) -> Vec<BackendHandle> {
        self.state.lock().await.cancelled.clone()
    }

    /// Register work that a previous process submitted.
    pub async fn seed(&self, job_id: JobId, state: BackendJobState) -> BackendHandle {
        let mut script = self.state.lock().await;
        let handle = script.allocate_handle();
        script.records.insert(handle.clone(), (job_id, state));
        handle
    }

    /// Drop the record of `handle`, as if the backend lost the work.
    pub async fn forget(&self, handle: &BackendHandle) {
        self.state.lock().await.records.remove(handle);
    }

    /// Finish `handle` successfully and deliver the completion signal.
    pub async fn complete(&self, handle: &BackendHandle, result: Value) -> Result<(), BackendError> {
        let state = BackendJobState::Succeeded { result: result.clone() };
        self.finish(handle, state, WorkOutcome::Succeeded(result)).await
    }

    /// Finish `handle` with a failure and deliver the completion signal.
    pub async fn fail(&self, handle: &BackendHandle, message: &str) -> Result<(), BackendError> {
        let state = BackendJobState::Failed { message: message.to_string() };
        let outcome = WorkOutcome::Failed {
            message: message.to_string(),
            details: None,
        };
        self.finish(handle, state, outcome).await
    }

    async fn finish(
        &self,
        handle: &BackendHandle,
        state: BackendJobState,
        outcome: WorkOutcome,
    ) -> Result<(), BackendError> {
        let job_id = {
            let mut script = self.state.lock().await;
            let record = script
                .records
                .get_mut(handle)
                .ok_or_else(|| BackendError::Protocol(format!("unknown handle {handle}")))?;
            record.1 = state;
            record.0
        };
        self.signals
            .send(BackendSignal {
                job_id,
                handle: handle.clone(),
                outcome,
            })
            .await
            .map_err(|_| BackendError::Unavailable("completion channel closed".into()))
    }
}

#[async_trait]
impl ExecutionBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn submit_work(
        &self,
        job_id: JobId,
        job_type: JobType,
        spec: &Value,
    ) -> Result<BackendHandle, BackendError> {
        let delay = {
            let mut script = self.state.lock().await;
            script.attempts += 1;
            if let Some(err) = script.submit_failures.pop_front() {
                return Err(err);
            }
            script.submit_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut script = self.state.lock().await;
        let handle = script.allocate_handle();
        script
            .records
            .insert(handle.clone(), (job_id, BackendJobState::Running));
        script.submissions.push(Submission {
            job_id,
            job_type,
            spec: spec.clone(),
            handle: handle.clone(),
        });
        Ok(handle)
    }

    async fn lookup(&self, handle: &BackendHandle) -> Result<Option<BackendJobState>, BackendError> {
        Ok(self
            .state
            .lock()
            .await
            .records
            .get(handle)
            .map(|(_, state)| state.clone()))
    }

    async fn watch(&self, _job_id: JobId, handle: &BackendHandle) -> Result<(), BackendError> {
        self.state.lock().await.watched.push(handle.clone());
        Ok(())
    }

    async fn cancel(&self, handle: &BackendHandle) -> Result<(), BackendError> {
        let mut script = self.state.lock().await;
        script.cancelled.push(handle.clone());
        if let Some(record) = script.records.get_mut(handle) {
            if record.1.is_active() {
                record.1 = BackendJobState::Failed {
                    message: "cancelled".to_string(),
                };
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use evalhub_core::backend::completion_channel;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn complete_delivers_signal_for_submitted_work() {
        let (tx, mut rx) = completion_channel();
        let backend = ScriptedBackend::new(tx);
        let job_id = uuid::Uuid::now_v7();

        let handle = backend
            .submit_work(job_id, JobType::Evaluation, &json!({"model": "bart-large-cnn"}))
            .await
            .unwrap();
        assert_eq!(backend.lookup(&handle).await.unwrap(), Some(BackendJobState::Running));

        backend.complete(&handle, json!({"rouge": 0.42})).await.unwrap();

        let signal = rx.recv().await.unwrap();
        assert_eq!(signal.job_id, job_id);
        assert_eq!(signal.handle, handle);
        assert_eq!(signal.outcome, WorkOutcome::Succeeded(json!({"rouge": 0.42})));
    }

    #[tokio::test]
    async fn forgotten_handle_has_no_record() {
        let (tx, _rx) = completion_channel();
        let backend = ScriptedBackend::new(tx);
        let handle = backend
            .seed(uuid::Uuid::now_v7(), BackendJobState::Running)
            .await;

        backend.forget(&handle).await;
        assert_eq!(backend.lookup(&handle).await.unwrap(), None);
        assert!(backend.complete(&handle, json!({})).await.is_err());
    }

    #[tokio::test]
    async fn cancel_is_recorded() {
        let (tx, _rx) = completion_channel();
        let backend = ScriptedBackend::new(tx);
        let handle = backend
            .submit_work(uuid::Uuid::now_v7(), JobType::Inference, &json!({}))
            .await
            .unwrap();

        backend.cancel(&handle).await.unwrap();
        assert_eq!(backend.cancelled().await, vec![handle.clone()]);
        assert!(!backend.lookup(&handle).await.unwrap().unwrap().is_active());
    }
}
