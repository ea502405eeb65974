//! Real-time notification delivery for Hearth.
//!
//! Only the host process owns client connections. Worker tasks reach them
//! through a [`WorkerRelay`], which forwards [`WorkerMessage`]s over the
//! worker's private channel; the host re-dispatches them into its
//! [`ConnectionRegistry`]. Both sides implement the same [`Notifier`] contract.

mod connections;
mod message;
mod notifier;
mod relay;

pub use connections::{ClientConnection, ConnectionId, ConnectionRegistry};
pub use message::{Notification, UserId, WorkerId, WorkerMessage};
pub use notifier::Notifier;
pub use relay::{RELAY_CHANNEL_SIZE, WorkerRelay};
