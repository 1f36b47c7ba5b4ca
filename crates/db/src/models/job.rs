//! Row mapping for the `jobs` table.

use evalhub_core::backend::BackendHandle;
use evalhub_core::job::{Job, JobFailure};
use evalhub_core::status::{FailureKind, JobStatus, JobType, StatusId};
use evalhub_core::types::{JobId, Timestamp};
use sqlx::FromRow;

use crate::error::StoreError;

/// A row from the `jobs` table. Status-like columns are lookup ids.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: JobId,
    pub job_type_id: StatusId,
    pub name: String,
    pub description: Option<String>,
    pub status_id: StatusId,
    pub spec: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error_kind_id: Option<StatusId>,
    pub error_message: Option<String>,
    pub error_details: Option<serde_json::Value>,
    pub backend_handle: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = move |reason: String| StoreError::CorruptRow { id, reason };

        let status = JobStatus::from_id(row.status_id)
            .ok_or_else(|| corrupt(format!("unknown status_id {}", row.status_id)))?;
        let job_type = JobType::from_id(row.job_type_id)
            .ok_or_else(|| corrupt(format!("unknown job_type_id {}", row.job_type_id)))?;
        let error = match row.error_kind_id {
            Some(kind_id) => {
                let kind = FailureKind::from_id(kind_id)
                    .ok_or_else(|| corrupt(format!("unknown error_kind_id {kind_id}")))?;
                Some(JobFailure {
                    kind,
                    message: row.error_message.unwrap_or_default(),
                    details: row.error_details,
                })
            }
            None => None,
        };

        Ok(Job {
            id: row.id,
            job_type,
            name: row.name,
            description: row.description,
            status,
            spec: row.spec,
            result: row.result,
            error,
            backend_handle: row.backend_handle.map(BackendHandle::new),
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            updated_at: row.updated_at,
        })
    }
}
