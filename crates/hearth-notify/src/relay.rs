//! Worker-side adapter that forwards deliveries to the host process.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::message::{Notification, UserId, WorkerId, WorkerMessage};
use crate::notifier::Notifier;

/// Capacity of a worker's private channel to the host.
pub const RELAY_CHANNEL_SIZE: usize = 256;

/// Forwards [`WorkerMessage`]s from a worker to the host process.
///
/// Delivery is fire-and-forget: a call succeeds as soon as the message is on
/// the channel. Whether a client actually received it is only known to the
/// host. Without a channel (or once the host side is gone) every call is a
/// logged no-op.
#[derive(Debug, Clone)]
pub struct WorkerRelay {
    worker_id: WorkerId,
    tx: Option<mpsc::Sender<WorkerMessage>>,
}

impl WorkerRelay {
    /// Create a relay and the host-side receiver for it.
    pub fn channel(worker_id: WorkerId, capacity: usize) -> (Self, mpsc::Receiver<WorkerMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(worker_id, tx), rx)
    }

    pub fn new(worker_id: WorkerId, tx: mpsc::Sender<WorkerMessage>) -> Self {
        Self {
            worker_id,
            tx: Some(tx),
        }
    }

    /// A relay with no host connection.
    pub fn detached(worker_id: WorkerId) -> Self {
        Self {
            worker_id,
            tx: None,
        }
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    /// True if the host side is still listening.
    pub fn is_connected(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Hand a message to the host. Returns false if it could not be queued.
    pub fn send(&self, message: WorkerMessage) -> bool {
        let Some(tx) = &self.tx else {
            debug!(
                worker_id = self.worker_id,
                kind = message.kind(),
                "no host channel, dropping message"
            );
            return false;
        };

        match tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                warn!(
                    worker_id = self.worker_id,
                    kind = message.kind(),
                    "host channel full, dropping message"
                );
                false
            }
            Err(TrySendError::Closed(message)) => {
                warn!(
                    worker_id = self.worker_id,
                    kind = message.kind(),
                    "host channel closed, dropping message"
                );
                false
            }
        }
    }
}

impl Notifier for WorkerRelay {
    fn deliver_to_user(&self, user_id: UserId, message: Notification) -> bool {
        self.send(WorkerMessage::SendToUser { user_id, message })
    }

    /// The fan-out happens in the host, so a successful hand-off counts as 1.
    fn broadcast(&self, message: Notification) -> usize {
        usize::from(self.send(WorkerMessage::Broadcast { message }))
    }
}
