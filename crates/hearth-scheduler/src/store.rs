//! SQLite-backed job store.
//!
//! The store is the only shared mutable state between workers. Claiming a job
//! is a plain field update, not a compare-and-swap: two workers that read the
//! same next pending job in the same instant may both run it. Execution is
//! therefore at-least-once and handlers must tolerate a repeat.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params, params_from_iter};
use serde_json::json;
use tracing::{debug, info};

use crate::error::SchedulerError;
use crate::schedule::CronSchedule;
use crate::types::{Job, JobId, NewJob, to_chrono};

/// Result recorded on jobs superseded by a newer job with the same tag.
pub const CANCELLED_ERROR: &str = "cancelled due to new job being created";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tag TEXT NOT NULL,
    job_type TEXT NOT NULL,
    user_id INTEGER,
    data TEXT NOT NULL,
    due INTEGER NOT NULL,
    started INTEGER,
    finished INTEGER,
    success INTEGER,
    result TEXT,
    cron_schedule TEXT,
    auto_reschedule_on_failure INTEGER NOT NULL DEFAULT 0,
    auto_reschedule_on_failure_delay INTEGER NOT NULL DEFAULT 0,
    remove_delay INTEGER NOT NULL,
    remove_at INTEGER NOT NULL,
    rescheduled_from_job INTEGER,
    persistent INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_jobs_pending ON jobs(finished, started);
CREATE INDEX IF NOT EXISTS idx_jobs_tag ON jobs(tag);
CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs(due);
";

const COLUMNS: &str = "id, tag, job_type, user_id, data, due, started, finished, success, result, \
     cron_schedule, auto_reschedule_on_failure, auto_reschedule_on_failure_delay, \
     remove_delay, remove_at, rescheduled_from_job, persistent, created_at";

/// `?1` is the stale cutoff in epoch milliseconds.
const PENDING_FILTER: &str = "finished IS NULL AND (started IS NULL OR started <= ?1)";

/// Store tuning.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Claimed-but-unfinished jobs older than this are eligible again.
    pub stale_threshold: Duration,
    /// Retention of terminal jobs when the caller gives none.
    pub default_remove_delay: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            stale_threshold: Duration::from_secs(30 * 60),
            default_remove_delay: Duration::from_secs(60 * 60),
        }
    }
}

/// Everything needed to insert a row.
struct InsertJob<'a> {
    tag: &'a str,
    job_type: &'a str,
    user_id: Option<i64>,
    data: &'a serde_json::Value,
    due: DateTime<Utc>,
    cron_schedule: Option<&'a str>,
    auto_reschedule_on_failure: bool,
    auto_reschedule_on_failure_delay: Duration,
    remove_delay: Duration,
    rescheduled_from_job: Option<JobId>,
    persistent: bool,
}

impl<'a> InsertJob<'a> {
    /// A successor of `job` due at `due`, carrying over its type, payload and policy.
    fn successor(job: &'a Job, due: DateTime<Utc>) -> Self {
        Self {
            tag: &job.tag,
            job_type: &job.job_type,
            user_id: job.user_id,
            data: &job.data,
            due,
            cron_schedule: job.cron_schedule.as_deref(),
            auto_reschedule_on_failure: job.auto_reschedule_on_failure,
            auto_reschedule_on_failure_delay: job.auto_reschedule_on_failure_delay,
            remove_delay: job.remove_delay,
            rescheduled_from_job: Some(job.id),
            persistent: job.persistent,
        }
    }
}

/// Durable job table.
pub struct JobStore {
    conn: Mutex<Connection>,
    config: StoreConfig,
}

impl JobStore {
    /// Open or create a store at `path`.
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self, SchedulerError> {
        let conn = Connection::open(path.as_ref())?;

        // WAL lets readers proceed while a worker writes.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        let store = Self::with_connection(conn, config)?;
        info!(path = %path.as_ref().display(), "job store opened");
        Ok(store)
    }

    /// Create a private in-memory store.
    pub fn open_in_memory(config: StoreConfig) -> Result<Self, SchedulerError> {
        Self::with_connection(Connection::open_in_memory()?, config)
    }

    fn with_connection(conn: Connection, config: StoreConfig) -> Result<Self, SchedulerError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            config,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, SchedulerError> {
        self.conn.lock().map_err(|_| SchedulerError::LockPoisoned)
    }

    fn stale_cutoff(&self, now: DateTime<Utc>) -> i64 {
        to_millis(now - to_chrono(self.config.stale_threshold))
    }

    /// Cancel pending jobs with `tag`, then insert `job`.
    #[tracing::instrument(skip(self, new), fields(tag = %new.tag, job_type = %new.job_type))]
    pub fn schedule(&self, new: NewJob) -> Result<Job, SchedulerError> {
        self.schedule_at(new, Utc::now())
    }

    pub(crate) fn schedule_at(&self, new: NewJob, now: DateTime<Utc>) -> Result<Job, SchedulerError> {
        let row = InsertJob {
            tag: &new.tag,
            job_type: &new.job_type,
            user_id: new.user_id,
            data: &new.data,
            due: new.due.unwrap_or(now),
            cron_schedule: None,
            auto_reschedule_on_failure: new.auto_reschedule_on_failure,
            auto_reschedule_on_failure_delay: new.auto_reschedule_on_failure_delay,
            remove_delay: new.remove_delay.unwrap_or(self.config.default_remove_delay),
            rescheduled_from_job: None,
            persistent: new.persistent,
        };
        let job = self.replace_pending(&row, now)?;
        debug!(job_id = job.id, due = %job.due, "scheduled job");
        Ok(job)
    }

    /// Like [`schedule`](Self::schedule), due at the next occurrence of
    /// `expression` after now. The job reschedules itself after every run.
    #[tracing::instrument(skip(self, new), fields(tag = %new.tag, job_type = %new.job_type))]
    pub fn schedule_cron(&self, new: NewJob, expression: &str) -> Result<Job, SchedulerError> {
        self.schedule_cron_at(new, expression, Utc::now())
    }

    pub(crate) fn schedule_cron_at(
        &self,
        new: NewJob,
        expression: &str,
        now: DateTime<Utc>,
    ) -> Result<Job, SchedulerError> {
        let cron = CronSchedule::parse(expression)?;
        let due = cron.require_next_after(now)?;
        let row = InsertJob {
            tag: &new.tag,
            job_type: &new.job_type,
            user_id: new.user_id,
            data: &new.data,
            due,
            cron_schedule: Some(cron.expression()),
            auto_reschedule_on_failure: new.auto_reschedule_on_failure,
            auto_reschedule_on_failure_delay: new.auto_reschedule_on_failure_delay,
            remove_delay: new.remove_delay.unwrap_or(self.config.default_remove_delay),
            rescheduled_from_job: None,
            persistent: new.persistent,
        };
        let job = self.replace_pending(&row, now)?;
        debug!(job_id = job.id, due = %job.due, cron = %cron.expression(), "scheduled cron job");
        Ok(job)
    }

    /// Cancel every pending job with `tag`. Returns how many were cancelled.
    pub fn cancel_pending(&self, tag: &str) -> Result<usize, SchedulerError> {
        let now = Utc::now();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let cancelled = cancel_pending_tx(&tx, tag, now, self.stale_cutoff(now))?;
        tx.commit()?;
        Ok(cancelled)
    }

    fn replace_pending(&self, row: &InsertJob<'_>, now: DateTime<Utc>) -> Result<Job, SchedulerError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let cancelled = cancel_pending_tx(&tx, row.tag, now, self.stale_cutoff(now))?;
        if cancelled > 0 {
            debug!(tag = row.tag, cancelled, "cancelled superseded jobs");
        }

        let id = insert_tx(&tx, row, now)?;
        let job = get_tx(&tx, id)?.ok_or(SchedulerError::JobNotFound(id))?;
        tx.commit()?;
        Ok(job)
    }

    /// Number of jobs eligible for claiming, due or not.
    pub fn get_total_pending(&self) -> Result<u64, SchedulerError> {
        self.get_total_pending_at(Utc::now())
    }

    pub(crate) fn get_total_pending_at(&self, now: DateTime<Utc>) -> Result<u64, SchedulerError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM jobs WHERE {PENDING_FILTER}"),
            params![self.stale_cutoff(now)],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// The earliest-due eligible job. It may not be due yet.
    pub fn get_next_pending(&self) -> Result<Option<Job>, SchedulerError> {
        self.get_next_pending_at(Utc::now())
    }

    pub(crate) fn get_next_pending_at(&self, now: DateTime<Utc>) -> Result<Option<Job>, SchedulerError> {
        let conn = self.conn()?;
        let job = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM jobs WHERE {PENDING_FILTER} ORDER BY due ASC, id ASC LIMIT 1"
                ),
                params![self.stale_cutoff(now)],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    /// Record that a worker claimed the job.
    pub fn mark_started(&self, id: JobId) -> Result<(), SchedulerError> {
        self.mark_started_at(id, Utc::now())
    }

    pub(crate) fn mark_started_at(&self, id: JobId, now: DateTime<Utc>) -> Result<(), SchedulerError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE jobs SET started = ?1 WHERE id = ?2",
            params![to_millis(now), id],
        )?;
        require_row(id, changed)
    }

    pub fn mark_succeeded(&self, id: JobId, result: Option<serde_json::Value>) -> Result<(), SchedulerError> {
        self.finish(id, true, result, Utc::now())
    }

    pub fn mark_failed(&self, id: JobId, result: Option<serde_json::Value>) -> Result<(), SchedulerError> {
        self.finish(id, false, result, Utc::now())
    }

    pub(crate) fn finish(
        &self,
        id: JobId,
        success: bool,
        result: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        let result = result.map(|r| serde_json::to_string(&r)).transpose()?;
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE jobs SET finished = ?1, success = ?2, result = ?3 WHERE id = ?4",
            params![to_millis(now), success, result, id],
        )?;
        require_row(id, changed)
    }

    /// Insert the next cron occurrence of `job`.
    ///
    /// The successor is due at the first occurrence after both now and the
    /// job's own due time, so `due` strictly increases along a cron chain.
    pub fn reschedule_on_cron(&self, job: &Job) -> Result<Job, SchedulerError> {
        self.reschedule_on_cron_at(job, Utc::now())
    }

    pub(crate) fn reschedule_on_cron_at(&self, job: &Job, now: DateTime<Utc>) -> Result<Job, SchedulerError> {
        let expression = job
            .cron_schedule
            .as_deref()
            .ok_or(SchedulerError::NotRecurring(job.id))?;
        let cron = CronSchedule::parse(expression)?;
        let due = cron.require_next_after(now.max(job.due))?;

        let successor = self.replace_pending(&InsertJob::successor(job, due), now)?;
        debug!(
            job_id = job.id,
            successor_id = successor.id,
            due = %successor.due,
            "rescheduled cron job"
        );
        Ok(successor)
    }

    /// Insert a retry of `job` due after its failure delay.
    pub fn reschedule_on_failure(&self, job: &Job) -> Result<Job, SchedulerError> {
        self.reschedule_on_failure_at(job, Utc::now())
    }

    pub(crate) fn reschedule_on_failure_at(&self, job: &Job, now: DateTime<Utc>) -> Result<Job, SchedulerError> {
        let due = now + to_chrono(job.auto_reschedule_on_failure_delay);
        let successor = self.replace_pending(&InsertJob::successor(job, due), now)?;
        debug!(
            job_id = job.id,
            successor_id = successor.id,
            due = %successor.due,
            "rescheduled failed job"
        );
        Ok(successor)
    }

    /// Delete terminal, non-persistent jobs past their `remove_at`, except
    /// `exclude`. Returns how many rows were deleted.
    pub fn remove_old_jobs(&self, exclude: &[JobId]) -> Result<usize, SchedulerError> {
        self.remove_old_jobs_at(exclude, Utc::now())
    }

    pub(crate) fn remove_old_jobs_at(&self, exclude: &[JobId], now: DateTime<Utc>) -> Result<usize, SchedulerError> {
        let mut sql = String::from(
            "DELETE FROM jobs WHERE finished IS NOT NULL AND persistent = 0 AND remove_at <= ?1",
        );
        if !exclude.is_empty() {
            let placeholders: Vec<String> = (0..exclude.len()).map(|i| format!("?{}", i + 2)).collect();
            sql.push_str(&format!(" AND id NOT IN ({})", placeholders.join(", ")));
        }

        let conn = self.conn()?;
        let removed = conn.execute(
            &sql,
            params_from_iter(std::iter::once(to_millis(now)).chain(exclude.iter().copied())),
        )?;
        if removed > 0 {
            info!(removed, "removed old jobs");
        }
        Ok(removed)
    }

    pub fn get(&self, id: JobId) -> Result<Option<Job>, SchedulerError> {
        let conn = self.conn()?;
        let job = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM jobs WHERE id = ?1"),
                params![id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    /// All jobs with `tag`, oldest first.
    pub fn list_by_tag(&self, tag: &str) -> Result<Vec<Job>, SchedulerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM jobs WHERE tag = ?1 ORDER BY id ASC"
        ))?;
        let jobs = stmt
            .query_map(params![tag], job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }
}

fn cancel_pending_tx(
    tx: &Transaction<'_>,
    tag: &str,
    now: DateTime<Utc>,
    stale_cutoff: i64,
) -> Result<usize, SchedulerError> {
    let result = json!({ "error": CANCELLED_ERROR }).to_string();
    let now = to_millis(now);
    let cancelled = tx.execute(
        &format!(
            "UPDATE jobs SET started = ?2, finished = ?2, success = 0, result = ?3 \
             WHERE tag = ?4 AND {PENDING_FILTER}"
        ),
        params![stale_cutoff, now, result, tag],
    )?;
    Ok(cancelled)
}

fn insert_tx(tx: &Transaction<'_>, row: &InsertJob<'_>, now: DateTime<Utc>) -> Result<JobId, SchedulerError> {
    let remove_at = row.due + to_chrono(row.remove_delay);
    tx.execute(
        "INSERT INTO jobs (tag, job_type, user_id, data, due, cron_schedule, \
         auto_reschedule_on_failure, auto_reschedule_on_failure_delay, remove_delay, remove_at, \
         rescheduled_from_job, persistent, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            row.tag,
            row.job_type,
            row.user_id,
            serde_json::to_string(row.data)?,
            to_millis(row.due),
            row.cron_schedule,
            row.auto_reschedule_on_failure,
            duration_millis(row.auto_reschedule_on_failure_delay),
            duration_millis(row.remove_delay),
            to_millis(remove_at),
            row.rescheduled_from_job,
            row.persistent,
            to_millis(now),
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

fn get_tx(tx: &Transaction<'_>, id: JobId) -> Result<Option<Job>, SchedulerError> {
    let job = tx
        .query_row(
            &format!("SELECT {COLUMNS} FROM jobs WHERE id = ?1"),
            params![id],
            job_from_row,
        )
        .optional()?;
    Ok(job)
}

fn require_row(id: JobId, changed: usize) -> Result<(), SchedulerError> {
    if changed == 0 {
        return Err(SchedulerError::JobNotFound(id));
    }
    Ok(())
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let data: String = row.get(4)?;
    let result: Option<String> = row.get(9)?;

    Ok(Job {
        id: row.get(0)?,
        tag: row.get(1)?,
        job_type: row.get(2)?,
        user_id: row.get(3)?,
        data: parse_json(4, &data)?,
        due: from_millis(row.get(5)?),
        started: row.get::<_, Option<i64>>(6)?.map(from_millis),
        finished: row.get::<_, Option<i64>>(7)?.map(from_millis),
        success: row.get(8)?,
        result: result.as_deref().map(|r| parse_json(9, r)).transpose()?,
        cron_schedule: row.get(10)?,
        auto_reschedule_on_failure: row.get(11)?,
        auto_reschedule_on_failure_delay: millis_duration(row.get(12)?),
        remove_delay: millis_duration(row.get(13)?),
        remove_at: from_millis(row.get(14)?),
        rescheduled_from_job: row.get(15)?,
        persistent: row.get(16)?,
        created_at: from_millis(row.get(17)?),
    })
}

fn parse_json(idx: usize, text: &str) -> rusqlite::Result<serde_json::Value> {
    serde_json::from_str(text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

fn millis_duration(ms: i64) -> Duration {
    Duration::from_millis(ms.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn store() -> JobStore {
        JobStore::open_in_memory(StoreConfig::default()).unwrap()
    }

    fn minutes(n: i64) -> chrono::Duration {
        chrono::Duration::minutes(n)
    }

    fn pending_for_tag(store: &JobStore, tag: &str, now: DateTime<Utc>) -> Vec<Job> {
        store
            .list_by_tag(tag)
            .unwrap()
            .into_iter()
            .filter(|j| j.is_pending_at(now, store.config().stale_threshold))
            .collect()
    }

    #[test]
    fn schedule_defaults_due_and_remove_at() {
        let store = store();
        let job = store.schedule(NewJob::new("t", "noop", json!({"k": 1}))).unwrap();

        assert!(job.id > 0);
        assert_eq!(job.data, json!({"k": 1}));
        assert_eq!(job.remove_delay, Duration::from_secs(3600));
        assert_eq!(job.remove_at - job.due, chrono::Duration::hours(1));
        assert!(job.started.is_none() && job.finished.is_none() && job.success.is_none());
        assert!(job.cron_schedule.is_none());
    }

    #[test]
    fn new_job_with_same_tag_cancels_pending_one() {
        let store = store();
        let first = store.schedule(NewJob::new("t", "noop", json!({}))).unwrap();
        let second = store.schedule(NewJob::new("t", "noop", json!({}))).unwrap();

        let first = store.get(first.id).unwrap().unwrap();
        assert!(first.is_terminal());
        assert_eq!(first.success, Some(false));
        assert_eq!(first.started, first.finished);
        assert_eq!(first.error_message(), Some(CANCELLED_ERROR));

        let pending = pending_for_tag(&store, "t", Utc::now());
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second.id);
    }

    #[test]
    fn scheduling_leaves_other_tags_and_running_jobs_alone() {
        let store = store();
        let now = Utc::now();
        let other = store.schedule_at(NewJob::new("other", "noop", json!({})), now).unwrap();
        let running = store.schedule_at(NewJob::new("t", "noop", json!({})), now).unwrap();
        store.mark_started_at(running.id, now).unwrap();

        store.schedule_at(NewJob::new("t", "noop", json!({})), now).unwrap();

        assert!(store.get(other.id).unwrap().unwrap().finished.is_none());
        let running = store.get(running.id).unwrap().unwrap();
        assert!(running.finished.is_none(), "fresh in-flight job must not be cancelled");
    }

    #[test]
    fn stale_in_flight_job_is_reclaimable_and_cancellable() {
        let store = store();
        let now = Utc::now();
        let job = store
            .schedule_at(NewJob::new("t", "noop", json!({})).due_at(now - minutes(40)), now - minutes(40))
            .unwrap();
        store.mark_started_at(job.id, now - minutes(31)).unwrap();

        assert_eq!(store.get_total_pending_at(now).unwrap(), 1);
        assert_eq!(store.get_next_pending_at(now).unwrap().unwrap().id, job.id);

        store.mark_started_at(job.id, now - minutes(10)).unwrap();
        assert_eq!(store.get_total_pending_at(now).unwrap(), 0);
        assert!(store.get_next_pending_at(now).unwrap().is_none());
    }

    #[test]
    fn next_pending_is_earliest_due_even_if_in_future() {
        let store = store();
        let now = Utc::now();
        store
            .schedule_at(NewJob::new("late", "noop", json!({})).due_at(now + minutes(20)), now)
            .unwrap();
        let early = store
            .schedule_at(NewJob::new("early", "noop", json!({})).due_at(now + minutes(5)), now)
            .unwrap();

        let next = store.get_next_pending_at(now).unwrap().unwrap();
        assert_eq!(next.id, early.id);
        assert!(next.due > now);
        assert_eq!(store.get_total_pending_at(now).unwrap(), 2);
    }

    #[test]
    fn mark_operations_fail_on_missing_row() {
        let store = store();
        assert!(matches!(store.mark_started(99), Err(SchedulerError::JobNotFound(99))));
        assert!(matches!(
            store.mark_succeeded(99, None),
            Err(SchedulerError::JobNotFound(99))
        ));
        assert!(matches!(
            store.mark_failed(99, Some(json!({"error": "x"}))),
            Err(SchedulerError::JobNotFound(99))
        ));
    }

    #[test]
    fn mark_succeeded_records_result() {
        let store = store();
        let job = store.schedule(NewJob::new("t", "noop", json!({}))).unwrap();
        store.mark_started(job.id).unwrap();
        store.mark_succeeded(job.id, Some(json!({"ok": true}))).unwrap();

        let job = store.get(job.id).unwrap().unwrap();
        assert_eq!(job.success, Some(true));
        assert_eq!(job.result, Some(json!({"ok": true})));
        assert!(job.finished.is_some());
    }

    #[test]
    fn cron_scheduling_computes_due_from_expression() {
        let store = store();
        let now = Utc::now();
        let job = store
            .schedule_cron_at(NewJob::new("hb", "heartbeat", json!({})), "* * * * *", now)
            .unwrap();

        assert_eq!(job.cron_schedule.as_deref(), Some("* * * * *"));
        assert!(job.due > now);
        assert!(job.due <= now + minutes(1));
    }

    #[test]
    fn invalid_cron_is_rejected_without_cancelling() {
        let store = store();
        let existing = store.schedule(NewJob::new("t", "noop", json!({}))).unwrap();
        let err = store
            .schedule_cron(NewJob::new("t", "noop", json!({})), "not a cron")
            .unwrap_err();

        assert!(matches!(err, SchedulerError::InvalidCron { .. }));
        assert!(store.get(existing.id).unwrap().unwrap().finished.is_none());
    }

    #[test]
    fn cron_reschedule_links_to_parent_and_moves_forward() {
        let store = store();
        let now = Utc::now();
        let job = store
            .schedule_cron_at(
                NewJob::new("hb", "heartbeat", json!({"n": 1})).for_user(3),
                "*/5 * * * *",
                now,
            )
            .unwrap();
        store.mark_started_at(job.id, job.due).unwrap();
        store.finish(job.id, true, None, job.due).unwrap();

        let next = store.reschedule_on_cron_at(&job, job.due).unwrap();
        assert_eq!(next.rescheduled_from_job, Some(job.id));
        assert!(next.due > job.due);
        assert_eq!(next.due - job.due, minutes(5));
        assert_eq!(next.tag, job.tag);
        assert_eq!(next.data, job.data);
        assert_eq!(next.user_id, Some(3));
        assert_eq!(next.cron_schedule, job.cron_schedule);
    }

    #[test]
    fn cron_reschedule_of_early_run_still_advances() {
        let store = store();
        let now = Utc::now();
        let job = store
            .schedule_cron_at(NewJob::new("hb", "heartbeat", json!({})), "0 * * * *", now)
            .unwrap();

        // Runs before its due time, e.g. after a manual trigger.
        let next = store.reschedule_on_cron_at(&job, now).unwrap();
        assert!(next.due > job.due);
    }

    #[test]
    fn cron_reschedule_requires_cron_schedule() {
        let store = store();
        let job = store.schedule(NewJob::new("t", "noop", json!({}))).unwrap();
        assert!(matches!(
            store.reschedule_on_cron(&job),
            Err(SchedulerError::NotRecurring(id)) if id == job.id
        ));
    }

    #[test]
    fn failure_reschedule_uses_job_delay() {
        let store = store();
        let now = Utc::now();
        let job = store
            .schedule_at(
                NewJob::new("retry", "flaky", json!({})).retry_on_failure(Duration::from_millis(5000)),
                now,
            )
            .unwrap();
        store.mark_started_at(job.id, now).unwrap();
        store.finish(job.id, false, Some(json!({"error": "nope"})), now).unwrap();

        let retry = store.reschedule_on_failure_at(&job, now).unwrap();
        assert_eq!(retry.rescheduled_from_job, Some(job.id));
        assert_eq!(retry.due.timestamp_millis(), (now + chrono::Duration::seconds(5)).timestamp_millis());
        assert!(retry.auto_reschedule_on_failure);
        assert_eq!(retry.auto_reschedule_on_failure_delay, Duration::from_millis(5000));
        assert!(retry.cron_schedule.is_none());
    }

    #[test]
    fn lineage_chain_is_acyclic() {
        let store = store();
        let now = Utc::now();
        let mut job = store
            .schedule_cron_at(NewJob::new("chain", "tick", json!({})), "* * * * *", now)
            .unwrap();
        let root = job.id;
        for _ in 0..4 {
            store.finish(job.id, true, None, job.due).unwrap();
            job = store.reschedule_on_cron_at(&job, job.due).unwrap();
        }

        let mut seen = std::collections::HashSet::new();
        let mut cursor = Some(job.id);
        while let Some(id) = cursor {
            assert!(seen.insert(id), "cycle at job {id}");
            let current = store.get(id).unwrap().unwrap();
            if let Some(parent) = current.rescheduled_from_job {
                assert!(parent < id);
            }
            cursor = current.rescheduled_from_job;
        }
        assert!(seen.contains(&root));
        assert_eq!(seen.len(), 5);
    }

    #[test]
    fn remove_old_jobs_only_touches_expired_terminal_rows() {
        let store = store();
        let past = Utc::now() - chrono::Duration::hours(3);
        let now = Utc::now();

        let expired = store.schedule_at(NewJob::new("a", "noop", json!({})).due_at(past), past).unwrap();
        store.finish(expired.id, true, None, past).unwrap();

        let persistent = store
            .schedule_at(NewJob::new("b", "noop", json!({})).due_at(past).persistent(), past)
            .unwrap();
        store.finish(persistent.id, true, None, past).unwrap();

        let unfinished = store.schedule_at(NewJob::new("c", "noop", json!({})).due_at(past), past).unwrap();
        store.mark_started_at(unfinished.id, past).unwrap();

        let fresh = store.schedule_at(NewJob::new("d", "noop", json!({})), now).unwrap();
        store.finish(fresh.id, true, None, now).unwrap();

        let excluded = store.schedule_at(NewJob::new("e", "noop", json!({})).due_at(past), past).unwrap();
        store.finish(excluded.id, false, None, past).unwrap();

        let removed = store.remove_old_jobs_at(&[excluded.id], now).unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(expired.id).unwrap().is_none());
        assert!(store.get(persistent.id).unwrap().is_some());
        assert!(store.get(unfinished.id).unwrap().is_some());
        assert!(store.get(fresh.id).unwrap().is_some());
        assert!(store.get(excluded.id).unwrap().is_some());

        // Running again is a no-op.
        assert_eq!(store.remove_old_jobs_at(&[excluded.id], now).unwrap(), 0);
    }

    #[test]
    fn ids_are_not_reused_after_removal() {
        let store = store();
        let past = Utc::now() - chrono::Duration::hours(3);
        let job = store.schedule_at(NewJob::new("a", "noop", json!({})).due_at(past), past).unwrap();
        store.finish(job.id, true, None, past).unwrap();
        store.remove_old_jobs(&[]).unwrap();

        let next = store.schedule(NewJob::new("a", "noop", json!({}))).unwrap();
        assert!(next.id > job.id);
    }

    #[test]
    fn cancel_pending_reports_count() {
        let store = store();
        store.schedule(NewJob::new("t", "noop", json!({}))).unwrap();
        assert_eq!(store.cancel_pending("t").unwrap(), 1);
        assert_eq!(store.cancel_pending("t").unwrap(), 0);
        assert_eq!(store.get_total_pending().unwrap(), 0);
    }

    #[test]
    fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");

        let id = {
            let store = JobStore::open(&path, StoreConfig::default()).unwrap();
            store.schedule(NewJob::new("t", "noop", json!({"x": 1}))).unwrap().id
        };

        let store = JobStore::open(&path, StoreConfig::default()).unwrap();
        let job = store.get(id).unwrap().unwrap();
        assert_eq!(job.data, json!({"x": 1}));
        assert_eq!(store.get_total_pending().unwrap(), 1);
    }
}
