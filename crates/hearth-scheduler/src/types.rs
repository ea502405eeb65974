//! Scheduler types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use hearth_notify::UserId;
use serde::{Deserialize, Serialize};

/// Row identity of a job. Assigned on insert, never reused.
pub type JobId = i64;

/// A persisted job.
///
/// Rows are never rescheduled in place: cron ticks and failure retries insert
/// a successor that points back through `rescheduled_from_job`, and the old
/// row stays as history until garbage collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Logical key; scheduling a job cancels pending jobs with the same tag.
    pub tag: String,
    /// Selects the registry handler.
    pub job_type: String,
    /// Owner context. `None` for system jobs.
    pub user_id: Option<UserId>,
    /// Handler input.
    pub data: serde_json::Value,
    /// Earliest time the job may run.
    pub due: DateTime<Utc>,
    /// Set when a worker claims the job.
    pub started: Option<DateTime<Utc>>,
    /// Set when the job reaches a terminal state.
    pub finished: Option<DateTime<Utc>>,
    /// Only set together with `finished`.
    pub success: Option<bool>,
    /// Handler output, or `{"error": ...}`.
    pub result: Option<serde_json::Value>,
    /// Recurrence expression; present for cron jobs.
    pub cron_schedule: Option<String>,
    pub auto_reschedule_on_failure: bool,
    pub auto_reschedule_on_failure_delay: Duration,
    /// How long a terminal job is kept after `due`.
    pub remove_delay: Duration,
    /// `due + remove_delay`; garbage collection threshold.
    pub remove_at: DateTime<Utc>,
    /// The job whose completion produced this one.
    pub rescheduled_from_job: Option<JobId>,
    /// Exempt from garbage collection.
    pub persistent: bool,
    pub created_at: DateTime<Utc>,
}

/// Coarse lifecycle state derived from the timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Not claimed yet.
    Pending,
    /// Claimed and not finished (running, or stale if a worker died).
    Started,
    Succeeded,
    Failed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Started => "started",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl Job {
    pub fn state(&self) -> JobState {
        match (self.started, self.finished, self.success) {
            (_, Some(_), Some(true)) => JobState::Succeeded,
            (_, Some(_), _) => JobState::Failed,
            (Some(_), None, _) => JobState::Started,
            (None, None, _) => JobState::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.finished.is_some()
    }

    /// Whether the job is eligible to be claimed at `now`.
    ///
    /// Unfinished jobs claimed longer than `stale_threshold` ago count as
    /// pending again so another worker can pick them up.
    pub fn is_pending_at(&self, now: DateTime<Utc>, stale_threshold: Duration) -> bool {
        if self.finished.is_some() {
            return false;
        }
        match self.started {
            None => true,
            Some(started) => started <= now - to_chrono(stale_threshold),
        }
    }

    pub fn is_recurring(&self) -> bool {
        self.cron_schedule.is_some()
    }

    /// Error message recorded for a failed job, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.result.as_ref()?.get("error")?.as_str()
    }
}

/// Parameters for scheduling a job.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub tag: String,
    pub job_type: String,
    pub user_id: Option<UserId>,
    pub data: serde_json::Value,
    /// Defaults to now. Ignored by cron scheduling.
    pub due: Option<DateTime<Utc>>,
    pub auto_reschedule_on_failure: bool,
    pub auto_reschedule_on_failure_delay: Duration,
    /// Defaults to the store's configured remove delay.
    pub remove_delay: Option<Duration>,
    pub persistent: bool,
}

impl NewJob {
    pub fn new(tag: impl Into<String>, job_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            tag: tag.into(),
            job_type: job_type.into(),
            user_id: None,
            data,
            due: None,
            auto_reschedule_on_failure: false,
            auto_reschedule_on_failure_delay: Duration::ZERO,
            remove_delay: None,
            persistent: false,
        }
    }

    pub fn for_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn due_at(mut self, due: DateTime<Utc>) -> Self {
        self.due = Some(due);
        self
    }

    /// Due `delay` from now.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.due = Some(Utc::now() + to_chrono(delay));
        self
    }

    /// Retry after `delay` whenever the job fails.
    pub fn retry_on_failure(mut self, delay: Duration) -> Self {
        self.auto_reschedule_on_failure = true;
        self.auto_reschedule_on_failure_delay = delay;
        self
    }

    pub fn remove_after(mut self, delay: Duration) -> Self {
        self.remove_delay = Some(delay);
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }
}

/// Ids of jobs currently executing in this process.
///
/// Shared by all workers so garbage collection can skip rows another worker
/// is still using.
#[derive(Debug, Default)]
pub struct InFlightJobs {
    ids: DashSet<JobId>,
}

impl InFlightJobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: JobId) {
        self.ids.insert(id);
    }

    pub fn remove(&self, id: JobId) {
        self.ids.remove(&id);
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.ids.contains(&id)
    }

    pub fn snapshot(&self) -> Vec<JobId> {
        self.ids.iter().map(|id| *id).collect()
    }
}

/// Convert a std duration, saturating at zero on overflow.
pub(crate) fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero())
}
