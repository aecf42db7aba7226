use thiserror::Error;

use crate::types::JobState;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored JSON column could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The schedule is malformed or can never produce a fire time.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// The job's version moved between read and write.
    #[error("Concurrent modification of job {id}")]
    ClaimConflict { id: String },

    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// Another live job already uses this name.
    #[error("Job name already in use: {name}")]
    DuplicateName { name: String },

    /// No handler with this name is registered on this instance.
    #[error("Unknown job handler: {name}")]
    UnknownHandler { name: String },

    /// The requested operation does not apply to the job's current state.
    #[error("Cannot {action} job {id} in state {state}")]
    InvalidTransition {
        id: String,
        state: JobState,
        action: &'static str,
    },

    /// The job store is unreachable; the service only serves reads.
    #[error("Service degraded: {0}")]
    Degraded(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// Short error code string sent to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Database(_) => "DATABASE_ERROR",
            SchedulerError::Serialization(_) => "SERIALIZATION_ERROR",
            SchedulerError::InvalidSchedule(_) => "INVALID_SCHEDULE",
            SchedulerError::ClaimConflict { .. } => "CLAIM_CONFLICT",
            SchedulerError::JobNotFound { .. } => "JOB_NOT_FOUND",
            SchedulerError::DuplicateName { .. } => "DUPLICATE_NAME",
            SchedulerError::UnknownHandler { .. } => "UNKNOWN_HANDLER",
            SchedulerError::InvalidTransition { .. } => "INVALID_TRANSITION",
            SchedulerError::Degraded(_) => "SERVICE_DEGRADED",
            SchedulerError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Errors raised by the store itself rather than by the request.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, SchedulerError::Database(_) | SchedulerError::Internal(_))
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
