use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    jobs::JOB_SEND_NOTIFICATION,
    models::Job,
    notifications::{send_notification, ScheduledNotification},
    state::AppState,
};

use super::{JobExecution, JobHandler};

pub const MAX_ATTEMPTS: i32 = 5;
const RETRY_DELAY: Duration = Duration::from_secs(30);

pub struct SendScheduledNotificationJob;

impl SendScheduledNotificationJob {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SendScheduledNotificationJob {
    fn default() -> Self {
        Self::new()
    }
}

/// Retry while attempts remain, fail the job afterwards.
pub fn retry_or_fail(attempts: i32, error: String) -> JobExecution {
    if attempts >= MAX_ATTEMPTS {
        JobExecution::Failed {
            error: format!("giving up after {attempts} attempts: {error}"),
        }
    } else {
        JobExecution::Retry {
            delay: RETRY_DELAY,
            error,
        }
    }
}

#[async_trait]
impl JobHandler for SendScheduledNotificationJob {
    fn job_type(&self) -> &'static str {
        JOB_SEND_NOTIFICATION
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let scheduled = match ScheduledNotification::from_job(&job) {
            Ok(scheduled) => scheduled,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid notification payload: {err}"),
                }
            }
        };

        match send_notification(&state, &scheduled.message, &scheduled.user_ids).await {
            Ok(outcome) => {
                info!(
                    job_id = %job.id,
                    company_id = %scheduled.company_id,
                    stored = outcome.notifications.len(),
                    "scheduled notification delivered"
                );
                JobExecution::Success
            }
            Err(err) => {
                warn!(job_id = %job.id, attempts = job.attempts, error = %err, "scheduled notification failed");
                retry_or_fail(job.attempts, err.to_string())
            }
        }
    }
}
