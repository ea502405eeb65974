//! Error types for the worker manager.

use thiserror::Error;

use hearth_scheduler::SchedulerError;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("worker manager already started")]
    AlreadyStarted,

    #[error("worker manager is shut down")]
    ShutDown,

    #[error("invalid worker count '{0}': expected a positive integer or 'cpus'")]
    InvalidWorkerCount(String),
}
