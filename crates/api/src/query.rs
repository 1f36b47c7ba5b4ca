//! Query-string parameters for list endpoints.

use evalhub_core::job::JobFilter;
use evalhub_core::status::{JobStatus, JobType};
use serde::Deserialize;

use crate::error::AppError;

/// Page size when the caller gives none.
pub const DEFAULT_LIMIT: i64 = 50;

/// Largest page a caller may request.
pub const MAX_LIMIT: i64 = 100;

/// `GET /api/v1/jobs?status=&job_type=&limit=&offset=`
///
/// Status and type are accepted case-insensitively.
#[derive(Debug, Default, Deserialize)]
pub struct JobListQuery {
    pub status: Option<String>,
    pub job_type: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl JobListQuery {
    /// Convert to a store filter, clamping `limit` to `1..=MAX_LIMIT`.
    pub fn into_filter(self) -> Result<JobFilter, AppError> {
        let status = self
            .status
            .as_deref()
            .map(str::parse::<JobStatus>)
            .transpose()?;
        let job_type = self
            .job_type
            .as_deref()
            .map(str::parse::<JobType>)
            .transpose()?;

        let limit = match self.limit {
            Some(l) if l < 0 => {
                return Err(AppError::BadRequest("limit must not be negative".into()));
            }
            Some(l) => l.clamp(1, MAX_LIMIT),
            None => DEFAULT_LIMIT,
        };
        let offset = match self.offset {
            Some(o) if o < 0 => {
                return Err(AppError::BadRequest("offset must not be negative".into()));
            }
            Some(o) => o,
            None => 0,
        };

        Ok(JobFilter {
            status,
            job_type,
            started_before: None,
            limit: Some(limit),
            offset: Some(offset),
        })
    }
}
