//! Durable job scheduling for Hearth.
//!
//! This crate provides:
//! - A SQLite-backed [`JobStore`] with tag supersession, cron and
//!   failure rescheduling, stale-claim recovery and garbage collection
//! - A static [`JobRegistry`] mapping job types to handlers
//! - The single-job-per-cycle [`WorkerLoop`] run by every worker

mod error;
pub mod maintenance;
mod registry;
mod schedule;
mod store;
mod types;
mod worker;

pub use error::{JobError, SchedulerError};
pub use registry::{JobContext, JobHandler, JobRegistry, JobRegistryBuilder};
pub use schedule::CronSchedule;
pub use store::{JobStore, StoreConfig};
pub use types::{InFlightJobs, Job, JobId, JobState, NewJob};
pub use worker::{TickOutcome, WorkerLoop, WorkerLoopConfig};
