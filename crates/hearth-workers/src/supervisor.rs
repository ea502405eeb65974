//! Restart-with-backoff supervision of a single worker slot.

use std::sync::Arc;
use std::time::Instant;

use backoff::backoff::Backoff;
use chrono::Utc;
use hearth_notify::{Notifier, RELAY_CHANNEL_SIZE, WorkerId, WorkerMessage, WorkerRelay};
use hearth_scheduler::{InFlightJobs, JobRegistry, JobStore, WorkerLoop};
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinError};
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::status::{StatusBoard, WorkerState};

/// Everything a slot needs to (re)spawn its worker.
pub(crate) struct Slot {
    pub(crate) worker_id: WorkerId,
    pub(crate) store: Arc<JobStore>,
    pub(crate) registry: Arc<JobRegistry>,
    pub(crate) in_flight: Arc<InFlightJobs>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) board: Arc<StatusBoard>,
    pub(crate) config: WorkerConfig,
}

/// Aborts the worker task if the supervisor itself is dropped or aborted.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Slot {
    /// Run the slot until shutdown or until the crash budget is exhausted.
    pub(crate) async fn supervise(self, mut shutdown: watch::Receiver<bool>) {
        let worker_id = self.worker_id;
        let mut backoff = self.config.restart_backoff();
        let mut crashes: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let started_at = Instant::now();
            let exit = self.spawn_and_wait(shutdown.clone()).await;

            let err = match exit {
                Ok(()) => break,
                Err(e) if e.is_cancelled() => {
                    debug!(worker_id, "worker task cancelled");
                    break;
                }
                Err(e) => e,
            };

            if started_at.elapsed() >= self.config.stable_after {
                crashes = 0;
                backoff.reset();
            }
            crashes += 1;

            let reason = crash_reason(err);
            if crashes > self.config.max_restarts {
                error!(
                    worker_id,
                    crashes,
                    reason = %reason,
                    "worker crashed too many times, giving up on slot"
                );
                self.board
                    .update(worker_id, |s| {
                        s.state = WorkerState::Failed;
                        s.last_error = Some(reason);
                    })
                    .await;
                return;
            }

            let delay = backoff
                .next_backoff()
                .unwrap_or(self.config.restart_max_delay);
            warn!(
                worker_id,
                crashes,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "worker crashed, restarting"
            );
            self.board
                .update(worker_id, |s| {
                    s.state = WorkerState::Restarting;
                    s.restarts += 1;
                    s.last_error = Some(reason);
                })
                .await;

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.board
            .update(worker_id, |s| s.state = WorkerState::Stopped)
            .await;
        info!(worker_id, "worker slot stopped");
    }

    /// Spawn one worker incarnation with a fresh private channel and pump its
    /// messages to the host until it exits.
    async fn spawn_and_wait(&self, shutdown: watch::Receiver<bool>) -> Result<(), JoinError> {
        let (relay, mut rx) = WorkerRelay::channel(self.worker_id, RELAY_CHANNEL_SIZE);
        let worker = WorkerLoop::new(
            self.store.clone(),
            self.registry.clone(),
            relay,
            self.in_flight.clone(),
            self.config.loop_config(),
        );

        self.board
            .update(self.worker_id, |s| s.state = WorkerState::Running)
            .await;

        let mut handle = tokio::spawn(async move { worker.run(shutdown).await });
        let _guard = AbortOnDrop(handle.abort_handle());

        // The worker task decides when the slot is done; handlers may keep
        // relay clones alive in detached tasks.
        let exit = loop {
            tokio::select! {
                exit = &mut handle => break exit,
                message = rx.recv() => match message {
                    Some(message) => self.dispatch(message).await,
                    None => break (&mut handle).await,
                },
            }
        };

        rx.close();
        self.drain(&mut rx).await;
        exit
    }

    /// Deliver what was queued before the worker exited.
    async fn drain(&self, rx: &mut mpsc::Receiver<WorkerMessage>) {
        while let Ok(message) = rx.try_recv() {
            self.dispatch(message).await;
        }
    }

    async fn dispatch(&self, message: WorkerMessage) {
        match message {
            WorkerMessage::WorkerStarted { worker_id, pid } => {
                info!(worker_id, pid, "worker reported start");
            }
            WorkerMessage::WorkerShutdown { worker_id, pid } => {
                info!(worker_id, pid, "worker reported shutdown");
            }
            WorkerMessage::WorkerError {
                worker_id,
                pid,
                error,
            } => {
                warn!(worker_id, pid, error = %error, "worker reported error");
                self.board
                    .update(worker_id, |s| s.last_error = Some(error))
                    .await;
            }
            WorkerMessage::Heartbeat { worker_id } => {
                self.board
                    .update(worker_id, |s| s.last_heartbeat = Some(Utc::now()))
                    .await;
            }
            WorkerMessage::SendToUser { user_id, message } => {
                let delivered = self.notifier.deliver_to_user(user_id, message);
                debug!(worker_id = self.worker_id, user_id, delivered, "relayed user message");
            }
            WorkerMessage::Broadcast { message } => {
                let recipients = self.notifier.broadcast(message);
                debug!(worker_id = self.worker_id, recipients, "relayed broadcast");
            }
        }
    }
}

fn crash_reason(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic".to_string()
    }
}
