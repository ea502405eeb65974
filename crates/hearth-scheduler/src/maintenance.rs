//! Built-in housekeeping jobs.

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use crate::error::{JobError, SchedulerError};
use crate::registry::{JobContext, JobHandler, JobRegistry};
use crate::store::JobStore;
use crate::types::{Job, NewJob};

/// Job type and tag of the garbage collection job.
pub const REMOVE_OLD_JOBS: &str = "remove_old_jobs";

/// Deletes expired terminal jobs, skipping those still in flight.
pub struct RemoveOldJobsHandler;

#[async_trait]
impl JobHandler for RemoveOldJobsHandler {
    async fn run(&self, ctx: &JobContext, job: &Job) -> Result<serde_json::Value, JobError> {
        let mut exclude = ctx.in_flight.snapshot();
        if !exclude.contains(&job.id) {
            exclude.push(job.id);
        }
        let removed = ctx.store.remove_old_jobs(&exclude)?;
        Ok(json!({ "removed": removed }))
    }
}

/// A job that should always have a pending instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurringJob {
    pub tag: String,
    pub job_type: String,
    pub cron: String,
}

impl RecurringJob {
    pub fn new(tag: impl Into<String>, job_type: impl Into<String>, cron: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            job_type: job_type.into(),
            cron: cron.into(),
        }
    }
}

/// Garbage collection, hourly.
pub fn default_recurring_jobs() -> Vec<RecurringJob> {
    vec![RecurringJob::new(REMOVE_OLD_JOBS, REMOVE_OLD_JOBS, "0 * * * *")]
}

/// Schedule every recurring job whose type is registered.
///
/// Scheduling supersedes any pending instance with the same tag, so calling
/// this on every startup leaves exactly one pending instance per job.
pub fn bootstrap(
    store: &JobStore,
    registry: &JobRegistry,
    jobs: &[RecurringJob],
) -> Result<Vec<Job>, SchedulerError> {
    let mut scheduled = Vec::with_capacity(jobs.len());
    for recurring in jobs {
        if !registry.contains(&recurring.job_type) {
            debug!(job_type = %recurring.job_type, "skipping recurring job with no handler");
            continue;
        }
        let job = store.schedule_cron(
            NewJob::new(&recurring.tag, &recurring.job_type, json!({})),
            &recurring.cron,
        )?;
        info!(tag = %job.tag, due = %job.due, "recurring job scheduled");
        scheduled.push(job);
    }
    Ok(scheduled)
}
