use evalhub_core::error::CoreError;
use evalhub_core::types::JobId;

/// Errors from a [`JobStore`](crate::JobStore) operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Domain rule violation (not found, illegal transition, conflict).
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be mapped back to a job.
    #[error("Corrupt job row {id}: {reason}")]
    CorruptRow { id: JobId, reason: String },
}

impl StoreError {
    /// The domain error, if this is one.
    pub fn as_core(&self) -> Option<&CoreError> {
        match self {
            StoreError::Core(e) => Some(e),
            _ => None,
        }
    }
}
