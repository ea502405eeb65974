//! Host-side registry of live client connections.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::message::{Notification, UserId};
use crate::notifier::Notifier;

/// Identifier of a single client connection.
pub type ConnectionId = u64;

struct Connection {
    user_id: Option<UserId>,
    tx: mpsc::UnboundedSender<Notification>,
}

/// A connected client: its id and the stream of messages addressed to it.
#[derive(Debug)]
pub struct ClientConnection {
    pub id: ConnectionId,
    pub rx: mpsc::UnboundedReceiver<Notification>,
}

/// The host process's connection manager.
///
/// The transport layer (websocket, SSE, ...) calls [`connect`] when a client
/// arrives and forwards everything received on [`ClientConnection::rx`].
/// Connections whose receiver was dropped are pruned on the next send.
///
/// [`connect`]: ConnectionRegistry::connect
#[derive(Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    connections: DashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Anonymous connections (`None`) only receive
    /// broadcasts.
    pub fn connect(&self, user_id: Option<UserId>) -> ClientConnection {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(id, Connection { user_id, tx });
        debug!(connection_id = id, user_id = ?user_id, "client connected");
        ClientConnection { id, rx }
    }

    /// Remove a connection. Returns false if it was already gone.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let removed = self.connections.remove(&id).is_some();
        if removed {
            debug!(connection_id = id, "client disconnected");
        }
        removed
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Number of connections belonging to `user_id`.
    pub fn user_connection_count(&self, user_id: UserId) -> usize {
        self.connections
            .iter()
            .filter(|c| c.user_id == Some(user_id))
            .count()
    }

    fn send_where(
        &self,
        message: &Notification,
        matches: impl Fn(&Connection) -> bool,
    ) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        for entry in self.connections.iter() {
            if !matches(entry.value()) {
                continue;
            }
            if entry.value().tx.send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                closed.push(*entry.key());
            }
        }

        // Removal must happen after the iterator's shard locks are released.
        for id in closed {
            trace!(connection_id = id, "pruning closed connection");
            self.connections.remove(&id);
        }

        delivered
    }
}

impl Notifier for ConnectionRegistry {
    fn deliver_to_user(&self, user_id: UserId, message: Notification) -> bool {
        let delivered = self.send_where(&message, |c| c.user_id == Some(user_id));
        debug!(
            user_id,
            message_type = %message.message_type,
            delivered,
            "delivered message to user"
        );
        delivered > 0
    }

    fn broadcast(&self, message: Notification) -> usize {
        let delivered = self.send_where(&message, |_| true);
        debug!(message_type = %message.message_type, delivered, "broadcast message");
        delivered
    }
}
