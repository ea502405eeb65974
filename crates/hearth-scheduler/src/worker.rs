//! The polling loop run by each worker.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hearth_notify::{WorkerId, WorkerMessage, WorkerRelay};
use serde_json::json;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::{JobError, SchedulerError};
use crate::registry::{JobContext, JobRegistry};
use crate::store::JobStore;
use crate::types::{InFlightJobs, Job, JobId};

#[derive(Debug, Clone)]
pub struct WorkerLoopConfig {
    /// Sleep between cycles.
    pub poll_interval: Duration,
    /// Send a heartbeat every this many cycles. Zero disables heartbeats.
    pub heartbeat_every: u32,
}

impl Default for WorkerLoopConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            heartbeat_every: 30,
        }
    }
}

/// What a single cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No pending job at all.
    Idle,
    /// The earliest pending job is not due yet.
    NotDue { job_id: JobId, due: DateTime<Utc> },
    /// A job ran to a terminal state.
    Completed {
        job_id: JobId,
        success: bool,
        /// Cron tick or retry inserted after this run.
        successor: Option<JobId>,
    },
}

/// Claims and executes at most one job per cycle.
pub struct WorkerLoop {
    worker_id: WorkerId,
    store: Arc<JobStore>,
    registry: Arc<JobRegistry>,
    relay: WorkerRelay,
    ctx: JobContext,
    config: WorkerLoopConfig,
}

impl WorkerLoop {
    pub fn new(
        store: Arc<JobStore>,
        registry: Arc<JobRegistry>,
        relay: WorkerRelay,
        in_flight: Arc<InFlightJobs>,
        config: WorkerLoopConfig,
    ) -> Self {
        let worker_id = relay.worker_id();
        let ctx = JobContext {
            worker_id,
            store: store.clone(),
            notifier: Arc::new(relay.clone()),
            in_flight,
        };
        Self {
            worker_id,
            store,
            registry,
            relay,
            ctx,
            config,
        }
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    /// Poll until `shutdown` becomes true or its sender is dropped.
    ///
    /// Shutdown is only observed between cycles, so a running job always
    /// finishes first. Cycle errors are reported to the host and the loop
    /// carries on. A panicking handler is not caught.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let pid = std::process::id();
        info!(worker_id = self.worker_id, "worker started");
        self.relay.send(WorkerMessage::WorkerStarted {
            worker_id: self.worker_id,
            pid,
        });

        let mut cycles: u64 = 0;
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.tick().await {
                Ok(outcome) => debug!(worker_id = self.worker_id, ?outcome, "cycle finished"),
                Err(e) => {
                    error!(worker_id = self.worker_id, error = %e, "worker cycle failed");
                    self.relay.send(WorkerMessage::WorkerError {
                        worker_id: self.worker_id,
                        pid,
                        error: e.to_string(),
                    });
                }
            }

            cycles += 1;
            let every = u64::from(self.config.heartbeat_every);
            if every > 0 && cycles % every == 0 {
                self.relay.send(WorkerMessage::Heartbeat {
                    worker_id: self.worker_id,
                });
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        debug!(worker_id = self.worker_id, "shutdown sender dropped");
                        break;
                    }
                }
                _ = sleep(self.config.poll_interval) => {}
            }
        }

        info!(worker_id = self.worker_id, "worker shutting down");
        self.relay.send(WorkerMessage::WorkerShutdown {
            worker_id: self.worker_id,
            pid,
        });
    }

    /// Run one cycle.
    pub async fn tick(&self) -> Result<TickOutcome, SchedulerError> {
        if self.store.get_total_pending()? == 0 {
            return Ok(TickOutcome::Idle);
        }
        let Some(job) = self.store.get_next_pending()? else {
            return Ok(TickOutcome::Idle);
        };
        if job.due > Utc::now() {
            return Ok(TickOutcome::NotDue {
                job_id: job.id,
                due: job.due,
            });
        }

        self.store.mark_started(job.id)?;
        let _guard = InFlight::enter(&self.ctx.in_flight, job.id);

        let span = info_span!(
            "job",
            worker_id = self.worker_id,
            job_id = job.id,
            job_type = %job.job_type,
            tag = %job.tag,
        );
        self.execute(job).instrument(span).await
    }

    async fn execute(&self, job: Job) -> Result<TickOutcome, SchedulerError> {
        let result = match self.registry.get(&job.job_type) {
            Ok(handler) => handler.run(&self.ctx, &job).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(value) => {
                self.store.mark_succeeded(job.id, Some(value))?;
                let successor = if job.is_recurring() {
                    Some(self.store.reschedule_on_cron(&job)?.id)
                } else {
                    None
                };
                info!(?successor, "job succeeded");
                Ok(TickOutcome::Completed {
                    job_id: job.id,
                    success: true,
                    successor,
                })
            }
            Err(e) => {
                self.record_failure(&job, &e);
                self.store
                    .mark_failed(job.id, Some(json!({ "error": e.to_string() })))?;

                let successor = if job.auto_reschedule_on_failure {
                    Some(self.store.reschedule_on_failure(&job)?.id)
                } else if job.is_recurring() {
                    Some(self.store.reschedule_on_cron(&job)?.id)
                } else {
                    None
                };
                Ok(TickOutcome::Completed {
                    job_id: job.id,
                    success: false,
                    successor,
                })
            }
        }
    }

    fn record_failure(&self, job: &Job, e: &JobError) {
        match e {
            JobError::UnknownType(_) => error!(error = %e, "no handler for job"),
            _ => warn!(error = %e, retry = job.auto_reschedule_on_failure, "job failed"),
        }
    }
}

/// Keeps a job id in the in-flight set for the lifetime of the guard,
/// including when the handler unwinds.
struct InFlight<'a> {
    set: &'a InFlightJobs,
    id: JobId,
}

impl<'a> InFlight<'a> {
    fn enter(set: &'a InFlightJobs, id: JobId) -> Self {
        set.insert(id);
        Self { set, id }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.remove(self.id);
    }
}
