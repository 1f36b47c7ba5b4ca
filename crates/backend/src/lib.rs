//! Execution backends.
//!
//! - [`ClusterBackend`]: batch cluster with a Ray-style job API.
//! - [`ServingBackend`]: online model-serving endpoint.
//! - [`ScriptedBackend`]: in-process double for tests.
//!
//! Plus [`retry`], the bounded backoff the dispatcher wraps submissions in.

use std::sync::Arc;

use evalhub_core::backend::{ExecutionBackend, SignalSender};
use tokio_util::sync::CancellationToken;

pub mod cluster;
pub mod retry;
pub mod scripted;
pub mod serving;

pub use cluster::{ClusterBackend, ClusterConfig};
pub use retry::RetryConfig;
pub use scripted::ScriptedBackend;
pub use serving::{ServingBackend, ServingConfig};

/// Which backend the service submits work to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Cluster,
    Serving,
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown backend kind '{0}' (expected 'cluster' or 'serving')")]
pub struct UnknownBackendKind(pub String);

impl std::str::FromStr for BackendKind {
    type Err = UnknownBackendKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cluster" => Ok(BackendKind::Cluster),
            "serving" => Ok(BackendKind::Serving),
            other => Err(UnknownBackendKind(other.to_string())),
        }
    }
}

/// Settings for the selected backend.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    Cluster(ClusterConfig),
    Serving(ServingConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Cluster(_) => BackendKind::Cluster,
            BackendConfig::Serving(_) => BackendKind::Serving,
        }
    }
}

/// Construct the configured backend. Its background tasks stop when
/// `cancel` fires.
pub fn build_backend(
    config: &BackendConfig,
    signals: SignalSender,
    cancel: CancellationToken,
) -> Result<Arc<dyn ExecutionBackend>, reqwest::Error> {
    let backend: Arc<dyn ExecutionBackend> = match config {
        BackendConfig::Cluster(c) => Arc::new(ClusterBackend::new(c.clone(), signals, cancel)?),
        BackendConfig::Serving(c) => Arc::new(ServingBackend::new(c.clone(), signals, cancel)?),
    };
    tracing::info!(backend = backend.name(), "Execution backend ready");
    Ok(backend)
}
