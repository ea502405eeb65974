//! Messages exchanged between worker tasks and the host process.

use serde::{Deserialize, Serialize};

/// Identifier of an end user.
pub type UserId = i64;

/// Index of a worker slot in the manager.
pub type WorkerId = usize;

/// A real-time message destined for a client connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Client-side message type (e.g. `"notification"`, `"job_finished"`).
    pub message_type: String,
    /// Arbitrary JSON payload.
    pub payload: serde_json::Value,
}

impl Notification {
    pub fn new(message_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            message_type: message_type.into(),
            payload,
        }
    }
}

/// Everything a worker can tell the host process.
///
/// Lifecycle, heartbeat and delivery requests share one channel and are
/// distinguished by variant (`type` tag on the wire).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// The worker loop has started polling.
    WorkerStarted { worker_id: WorkerId, pid: u32 },
    /// The worker loop stopped after a shutdown request.
    WorkerShutdown { worker_id: WorkerId, pid: u32 },
    /// A polling cycle failed; the worker keeps running.
    WorkerError {
        worker_id: WorkerId,
        pid: u32,
        error: String,
    },
    /// Periodic liveness signal.
    Heartbeat { worker_id: WorkerId },
    /// Deliver a message to every connection of one user.
    SendToUser {
        user_id: UserId,
        message: Notification,
    },
    /// Deliver a message to every connection.
    Broadcast { message: Notification },
}

impl WorkerMessage {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerMessage::WorkerStarted { .. } => "worker_started",
            WorkerMessage::WorkerShutdown { .. } => "worker_shutdown",
            WorkerMessage::WorkerError { .. } => "worker_error",
            WorkerMessage::Heartbeat { .. } => "heartbeat",
            WorkerMessage::SendToUser { .. } => "send_to_user",
            WorkerMessage::Broadcast { .. } => "broadcast",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn send_to_user_is_tagged_on_the_wire() {
        let msg = WorkerMessage::SendToUser {
            user_id: 7,
            message: Notification::new("notification", json!({"text": "hi"})),
        };

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "send_to_user",
                "user_id": 7,
                "message": {"message_type": "notification", "payload": {"text": "hi"}}
            })
        );
    }

    #[test]
    fn lifecycle_messages_decode_by_tag() {
        let msg: WorkerMessage =
            serde_json::from_str(r#"{"type":"worker_error","worker_id":2,"pid":10,"error":"db"}"#)
                .unwrap();
        assert_eq!(
            msg,
            WorkerMessage::WorkerError {
                worker_id: 2,
                pid: 10,
                error: "db".to_string()
            }
        );
        assert_eq!(msg.kind(), "worker_error");
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let result: Result<WorkerMessage, _> = serde_json::from_str(r#"{"type":"reboot"}"#);
        assert!(result.is_err());
    }
}
