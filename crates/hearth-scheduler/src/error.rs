//! Error types for the scheduler.

use thiserror::Error;

use crate::types::JobId;

/// Errors raised by the job store and registry construction.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// SQLite error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The store's connection mutex was poisoned by a panicking holder.
    #[error("job store lock poisoned")]
    LockPoisoned,

    /// A mark operation targeted a row that does not exist.
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// Cron expression could not be parsed or has no future occurrence.
    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    /// Cron rescheduling was requested for a job without a cron schedule.
    #[error("job {0} has no cron schedule")]
    NotRecurring(JobId),

    /// Job payload could not be (de)serialized.
    #[error("invalid job payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// The same job type was registered twice.
    #[error("job type registered twice: {0}")]
    DuplicateJobType(String),
}

/// Errors produced while running a single job.
///
/// These are recorded on the job row and never stop a worker.
#[derive(Debug, Error)]
pub enum JobError {
    /// No handler is registered for the job's type.
    #[error("unknown job type: {0}")]
    UnknownType(String),

    /// The job's `data` does not have the shape the handler expects.
    #[error("invalid job data: {0}")]
    InvalidData(String),

    /// The handler hit a store error.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// The handler reported a failure.
    #[error("{0}")]
    Failed(String),
}

impl JobError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn invalid_data(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }
}
