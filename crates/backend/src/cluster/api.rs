//! REST client for a Ray-style job submission API.
//!
//! Wraps `POST /api/jobs/`, `GET /api/jobs/{id}` and
//! `POST /api/jobs/{id}/stop` using [`reqwest`].

use std::collections::HashMap;
use std::time::Duration;

use evalhub_core::backend::BackendError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-request timeout for cluster API calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for one cluster head node.
pub struct ClusterApi {
    client: reqwest::Client,
    base_url: String,
}

/// Body of `POST /api/jobs/`.
#[derive(Debug, Serialize)]
pub struct SubmitRequest<'a> {
    pub submission_id: &'a str,
    pub entrypoint: &'a str,
    pub runtime_env: Value,
    pub metadata: HashMap<String, String>,
}

/// Response returned by `POST /api/jobs/` after the job was accepted.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    pub submission_id: String,
}

/// Job status as reported by the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterJobStatus {
    Pending,
    Running,
    Stopped,
    Succeeded,
    Failed,
}

/// Response of `GET /api/jobs/{id}`. Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct JobDetails {
    pub status: ClusterJobStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Errors from the cluster REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ClusterApiError {
    /// The HTTP request itself failed (network, DNS, TLS, decode).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The cluster returned a non-2xx status code.
    #[error("Cluster API error ({status}): {body}")]
    ApiError { status: u16, body: String },
}

impl From<ClusterApiError> for BackendError {
    fn from(err: ClusterApiError) -> Self {
        match &err {
            ClusterApiError::Request(e) if e.is_decode() => BackendError::Protocol(err.to_string()),
            ClusterApiError::Request(_) => BackendError::Unavailable(err.to_string()),
            ClusterApiError::ApiError { status, .. } if *status >= 500 || *status == 429 => {
                BackendError::Unavailable(err.to_string())
            }
            ClusterApiError::ApiError { .. } => BackendError::Rejected(err.to_string()),
        }
    }
}

impl ClusterApi {
    /// * `base_url` - Dashboard URL, e.g. `http://head:8265`.
    pub fn new(base_url: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Submit a job. Returns the accepted submission id.
    pub async fn submit(&self, request: &SubmitRequest<'_>) -> Result<SubmitResponse, ClusterApiError> {
        let response = self
            .client
            .post(format!("{}/api/jobs/", self.base_url))
            .json(request)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Fetch job details. `Ok(None)` when the cluster has no such job.
    pub async fn get_job(&self, submission_id: &str) -> Result<Option<JobDetails>, ClusterApiError> {
        let response = self
            .client
            .get(format!("{}/api/jobs/{}", self.base_url, submission_id))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::parse_response(response).await.map(Some)
    }

    /// Ask the cluster to stop a job.
    pub async fn stop_job(&self, submission_id: &str) -> Result<(), ClusterApiError> {
        let response = self
            .client
            .post(format!("{}/api/jobs/{}/stop", self.base_url, submission_id))
            .send()
            .await?;

        Self::ensure_success(response).await?;
        Ok(())
    }

    // ---- private helpers ----

    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ClusterApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ClusterApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ClusterApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}
