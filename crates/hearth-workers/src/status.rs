//! Per-slot worker status.

use chrono::{DateTime, Utc};
use hearth_notify::WorkerId;
use serde::Serialize;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Running,
    /// Crashed and waiting out the restart delay.
    Restarting,
    /// Gave up after too many consecutive crashes.
    Failed,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStatus {
    pub worker_id: WorkerId,
    pub state: WorkerState,
    /// Restarts since the manager started.
    pub restarts: u32,
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Most recent cycle error or crash reason.
    pub last_error: Option<String>,
}

impl WorkerStatus {
    fn new(worker_id: WorkerId) -> Self {
        Self {
            worker_id,
            state: WorkerState::Stopped,
            restarts: 0,
            last_heartbeat: None,
            last_error: None,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatusBoard {
    slots: RwLock<Vec<WorkerStatus>>,
}

impl StatusBoard {
    pub(crate) async fn reset(&self, count: usize) {
        *self.slots.write().await = (0..count).map(WorkerStatus::new).collect();
    }

    pub(crate) async fn update(&self, worker_id: WorkerId, f: impl FnOnce(&mut WorkerStatus)) {
        if let Some(slot) = self.slots.write().await.get_mut(worker_id) {
            f(slot);
        }
    }

    pub(crate) async fn snapshot(&self) -> Vec<WorkerStatus> {
        self.slots.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn updates_apply_to_one_slot() {
        let board = StatusBoard::default();
        board.reset(2).await;
        board
            .update(1, |s| {
                s.state = WorkerState::Running;
                s.restarts = 3;
            })
            .await;
        // Out of range ids are ignored.
        board.update(9, |s| s.state = WorkerState::Failed).await;

        let slots = board.snapshot().await;
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].state, WorkerState::Stopped);
        assert_eq!(slots[1].state, WorkerState::Running);
        assert_eq!(slots[1].restarts, 3);
    }
}
