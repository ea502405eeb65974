//! The delivery contract shared by the host and worker sides.

use crate::message::{Notification, UserId};

/// Delivers real-time messages to connected clients.
///
/// Implementations never fail loudly: an undeliverable message is reported
/// through the return value and logged.
pub trait Notifier: Send + Sync {
    /// Deliver to every connection of `user_id`. Returns true if the message
    /// was handed off.
    fn deliver_to_user(&self, user_id: UserId, message: Notification) -> bool;

    /// Deliver to every connection. Returns the best-effort fan-out count.
    fn broadcast(&self, message: Notification) -> usize;
}
