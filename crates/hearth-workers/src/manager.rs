//! Worker pool lifecycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use hearth_notify::Notifier;
use hearth_scheduler::maintenance::{self, RecurringJob};
use hearth_scheduler::{InFlightJobs, Job, JobRegistry, JobStore, NewJob};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::status::{StatusBoard, WorkerState, WorkerStatus};
use crate::supervisor::Slot;

/// Owns a fixed number of supervised worker slots.
///
/// All workers poll the same store, so submitting a job never targets a
/// particular worker. Messages from workers are re-dispatched into the
/// host's `notifier`.
pub struct WorkerManager {
    store: Arc<JobStore>,
    registry: Arc<JobRegistry>,
    notifier: Arc<dyn Notifier>,
    config: WorkerConfig,
    recurring: Vec<RecurringJob>,
    in_flight: Arc<InFlightJobs>,
    board: Arc<StatusBoard>,
    shutdown_tx: watch::Sender<bool>,
    supervisors: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl WorkerManager {
    pub fn new(
        store: Arc<JobStore>,
        registry: Arc<JobRegistry>,
        notifier: Arc<dyn Notifier>,
        config: WorkerConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            store,
            registry,
            notifier,
            config,
            recurring: maintenance::default_recurring_jobs(),
            in_flight: Arc::new(InFlightJobs::new()),
            board: Arc::new(StatusBoard::default()),
            shutdown_tx,
            supervisors: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Replace the recurring jobs scheduled on start.
    pub fn with_recurring_jobs(mut self, jobs: Vec<RecurringJob>) -> Self {
        self.recurring = jobs;
        self
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Schedule the recurring jobs, then spawn the worker slots. Returns the
    /// number of slots.
    pub async fn start(&self) -> Result<usize, WorkerError> {
        if *self.shutdown_tx.borrow() {
            return Err(WorkerError::ShutDown);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(WorkerError::AlreadyStarted);
        }

        maintenance::bootstrap(&self.store, &self.registry, &self.recurring)?;

        let count = self.config.count.resolve();
        self.board.reset(count).await;

        let mut supervisors = self.supervisors.lock().await;
        for worker_id in 0..count {
            let slot = Slot {
                worker_id,
                store: self.store.clone(),
                registry: self.registry.clone(),
                in_flight: self.in_flight.clone(),
                notifier: self.notifier.clone(),
                board: self.board.clone(),
                config: self.config.clone(),
            };
            let shutdown = self.shutdown_tx.subscribe();
            supervisors.push(tokio::spawn(slot.supervise(shutdown)));
        }

        info!(workers = count, job_types = ?self.registry.job_types(), "worker manager started");
        Ok(count)
    }

    /// Schedule a one-off job.
    pub fn submit_job(&self, job: NewJob) -> Result<Job, WorkerError> {
        Ok(self.store.schedule(job)?)
    }

    /// Schedule a recurring job.
    pub fn submit_cron_job(&self, job: NewJob, cron: &str) -> Result<Job, WorkerError> {
        Ok(self.store.schedule_cron(job, cron)?)
    }

    pub async fn status(&self) -> Vec<WorkerStatus> {
        self.board.snapshot().await
    }

    /// Ask every worker to stop after its current job, then abort whatever is
    /// still running once the shutdown timeout elapses.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);

        let supervisors = std::mem::take(&mut *self.supervisors.lock().await);
        if supervisors.is_empty() {
            return;
        }
        info!(workers = supervisors.len(), "shutting down workers");

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        let mut aborted = 0usize;
        for (worker_id, mut handle) in supervisors.into_iter().enumerate() {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(worker_id, error = %e, "worker supervisor ended abnormally"),
                Err(_) => {
                    handle.abort();
                    aborted += 1;
                    self.board
                        .update(worker_id, |s| s.state = WorkerState::Stopped)
                        .await;
                }
            }
        }

        if aborted > 0 {
            warn!(aborted, "workers did not stop in time and were aborted");
        }
        info!("worker manager shut down");
    }
}
