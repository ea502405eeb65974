//! Worker pool configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use backoff::ExponentialBackoff;
use hearth_scheduler::WorkerLoopConfig;

use crate::error::WorkerError;

/// How many worker slots to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerCount {
    Fixed(usize),
    /// One worker per available core.
    PerCore,
}

impl WorkerCount {
    pub fn resolve(self) -> usize {
        match self {
            WorkerCount::Fixed(n) => n,
            WorkerCount::PerCore => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

impl Default for WorkerCount {
    fn default() -> Self {
        WorkerCount::Fixed(1)
    }
}

impl FromStr for WorkerCount {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cpus" | "auto" => Ok(WorkerCount::PerCore),
            other => match other.parse::<usize>() {
                Ok(n) if n > 0 => Ok(WorkerCount::Fixed(n)),
                _ => Err(WorkerError::InvalidWorkerCount(s.to_string())),
            },
        }
    }
}

impl fmt::Display for WorkerCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerCount::Fixed(n) => write!(f, "{n}"),
            WorkerCount::PerCore => f.write_str("cpus"),
        }
    }
}

/// Configuration for the worker manager.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub count: WorkerCount,
    /// Sleep between worker cycles.
    pub poll_interval: Duration,
    /// Heartbeat every this many cycles (0 disables).
    pub heartbeat_every: u32,
    /// First restart delay after a crash.
    pub restart_base_delay: Duration,
    /// Upper bound on the restart delay.
    pub restart_max_delay: Duration,
    /// Consecutive crashes tolerated before a slot is given up.
    pub max_restarts: u32,
    /// A worker that runs this long without crashing resets its crash count.
    pub stable_after: Duration,
    /// How long `shutdown` waits before aborting workers.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: WorkerCount::default(),
            poll_interval: Duration::from_secs(1),
            heartbeat_every: 30,
            restart_base_delay: Duration::from_millis(500),
            restart_max_delay: Duration::from_secs(10),
            max_restarts: 5,
            stable_after: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl WorkerConfig {
    pub(crate) fn loop_config(&self) -> WorkerLoopConfig {
        WorkerLoopConfig {
            poll_interval: self.poll_interval,
            heartbeat_every: self.heartbeat_every,
        }
    }

    /// Deterministic doubling from the base delay up to the cap.
    pub(crate) fn restart_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.restart_base_delay,
            initial_interval: self.restart_base_delay,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: self.restart_max_delay,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}
