//! Job handlers shipped with the host binary.

use async_trait::async_trait;
use hearth_notify::Notification;
use hearth_scheduler::{Job, JobContext, JobError, JobHandler, JobRegistry, SchedulerError};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

pub const SEND_NOTIFICATION: &str = "send_notification";

#[derive(Debug, Deserialize)]
struct SendNotificationData {
    message_type: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Pushes a real-time message to the job's user, or to everyone for a
/// system job.
pub struct SendNotificationHandler;

#[async_trait]
impl JobHandler for SendNotificationHandler {
    async fn run(&self, ctx: &JobContext, job: &Job) -> Result<serde_json::Value, JobError> {
        let data: SendNotificationData = serde_json::from_value(job.data.clone())
            .map_err(|e| JobError::invalid_data(e.to_string()))?;
        let message = Notification::new(data.message_type, data.payload);

        match job.user_id {
            Some(user_id) => {
                let sent = ctx.notifier.deliver_to_user(user_id, message);
                info!(user_id, sent, "notification sent to user");
                Ok(json!({ "user_id": user_id, "sent": sent }))
            }
            None => {
                let recipients = ctx.notifier.broadcast(message);
                info!(recipients, "notification broadcast");
                Ok(json!({ "broadcast": recipients }))
            }
        }
    }
}

/// Registry used by the daemon: maintenance plus the handlers above.
pub fn registry() -> Result<JobRegistry, SchedulerError> {
    JobRegistry::builder()
        .with_maintenance()
        .register(SEND_NOTIFICATION, SendNotificationHandler)
        .build()
}
