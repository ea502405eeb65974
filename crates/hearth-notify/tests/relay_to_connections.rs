//! End-to-end path from a worker relay into the host's connection registry.

use std::sync::Arc;

use hearth_notify::{ConnectionRegistry, Notification, Notifier, WorkerMessage, WorkerRelay};
use serde_json::json;

/// Minimal host-side pump: what the worker manager does for each slot.
fn pump(rx: &mut tokio::sync::mpsc::Receiver<WorkerMessage>, host: &dyn Notifier) -> usize {
    let mut handled = 0;
    while let Ok(msg) = rx.try_recv() {
        match msg {
            WorkerMessage::SendToUser { user_id, message } => {
                host.deliver_to_user(user_id, message);
            }
            WorkerMessage::Broadcast { message } => {
                host.broadcast(message);
            }
            _ => {}
        }
        handled += 1;
    }
    handled
}

#[tokio::test]
async fn worker_notification_reaches_the_user_connection() {
    let host = Arc::new(ConnectionRegistry::new());
    let mut client = host.connect(Some(5));
    let mut other = host.connect(Some(6));

    let (relay, mut rx) = WorkerRelay::channel(0, 16);
    let relay: Arc<dyn Notifier> = Arc::new(relay);

    assert!(relay.deliver_to_user(5, Notification::new("token_deployed", json!({"address": "0xabc"}))));
    assert_eq!(relay.broadcast(Notification::new("maintenance", json!({}))), 1);

    assert_eq!(pump(&mut rx, host.as_ref()), 2);

    let first = client.rx.recv().await.unwrap();
    assert_eq!(first.message_type, "token_deployed");
    let second = client.rx.recv().await.unwrap();
    assert_eq!(second.message_type, "maintenance");

    let only = other.rx.recv().await.unwrap();
    assert_eq!(only.message_type, "maintenance");
    assert!(other.rx.try_recv().is_err());
}
