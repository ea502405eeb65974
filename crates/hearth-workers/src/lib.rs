//! Supervised worker pool for Hearth.
//!
//! A [`WorkerManager`] runs a fixed number of worker slots. Each slot runs a
//! [`hearth_scheduler::WorkerLoop`] as a tokio task, relays its messages to
//! the host's notifier over a private channel, and restarts it with
//! exponential backoff when it crashes.

mod config;
mod error;
mod manager;
mod status;
mod supervisor;

pub use config::{WorkerConfig, WorkerCount};
pub use error::WorkerError;
pub use manager::WorkerManager;
pub use status::{WorkerState, WorkerStatus};
