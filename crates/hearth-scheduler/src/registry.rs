//! Job type registry.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use async_trait::async_trait;
use hearth_notify::{Notifier, WorkerId};

use crate::error::{JobError, SchedulerError};
use crate::maintenance::{REMOVE_OLD_JOBS, RemoveOldJobsHandler};
use crate::store::JobStore;
use crate::types::{InFlightJobs, Job};

/// Executes one job type.
///
/// The returned value is stored as the job's result. An error marks the job
/// failed with `{"error": <message>}`. A panic is not caught and takes the
/// worker down with it.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, ctx: &JobContext, job: &Job) -> Result<serde_json::Value, JobError>;
}

/// What a handler may touch while running.
#[derive(Clone)]
pub struct JobContext {
    pub worker_id: WorkerId,
    pub store: Arc<JobStore>,
    /// Real-time delivery. In a worker this is the relay to the host.
    pub notifier: Arc<dyn Notifier>,
    /// Jobs currently executing in this process.
    pub in_flight: Arc<InFlightJobs>,
}

/// Static mapping from job type to handler.
///
/// Built once at startup and shared read-only by every worker.
#[derive(Clone, Default)]
pub struct JobRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobRegistry {
    pub fn builder() -> JobRegistryBuilder {
        JobRegistryBuilder::default()
    }

    /// Look up the handler for `job_type`.
    pub fn get(&self, job_type: &str) -> Result<Arc<dyn JobHandler>, JobError> {
        self.handlers
            .get(job_type)
            .cloned()
            .ok_or_else(|| JobError::UnknownType(job_type.to_string()))
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Registered types, sorted.
    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}

#[derive(Default)]
pub struct JobRegistryBuilder {
    handlers: Vec<(String, Arc<dyn JobHandler>)>,
}

impl JobRegistryBuilder {
    pub fn register(mut self, job_type: impl Into<String>, handler: impl JobHandler + 'static) -> Self {
        self.handlers.push((job_type.into(), Arc::new(handler)));
        self
    }

    /// Register the built-in garbage collection job.
    pub fn with_maintenance(self) -> Self {
        self.register(REMOVE_OLD_JOBS, RemoveOldJobsHandler)
    }

    /// Fails if a job type was registered more than once.
    pub fn build(self) -> Result<JobRegistry, SchedulerError> {
        let mut handlers = HashMap::with_capacity(self.handlers.len());
        for (job_type, handler) in self.handlers {
            match handlers.entry(job_type) {
                Entry::Occupied(entry) => {
                    return Err(SchedulerError::DuplicateJobType(entry.key().clone()));
                }
                Entry::Vacant(entry) => {
                    entry.insert(handler);
                }
            }
        }
        Ok(JobRegistry { handlers })
    }
}
