use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    jobs::{complete_job, requeue_stalled_jobs, reserve_job, JobCompletion, JobQueueError},
    models::Job,
    state::AppState,
};

pub mod notifications;

/// A job still `processing` after this long is assumed abandoned.
const STALLED_AFTER_MINUTES: i64 = 15;

/// Outcome of one attempt. `Retry` puts the job back in the queue after `delay`.
#[derive(Debug, PartialEq, Eq)]
pub enum JobExecution {
    Success,
    Retry { delay: Duration, error: String },
    Failed { error: String },
}

impl From<JobExecution> for JobCompletion {
    fn from(execution: JobExecution) -> Self {
        match execution {
            JobExecution::Success => JobCompletion::Succeeded,
            JobExecution::Retry { delay, error } => JobCompletion::retry_in(delay, error),
            JobExecution::Failed { error } => JobCompletion::Failed { error },
        }
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;
    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution;
}

/// Polls the `jobs` table and hands each reserved job to the handler registered for its type.
pub struct Worker {
    state: Arc<AppState>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        state: Arc<AppState>,
        handlers: Vec<Arc<dyn JobHandler>>,
        poll_interval: Duration,
    ) -> Self {
        let handlers = handlers
            .into_iter()
            .map(|handler| (handler.job_type(), handler))
            .collect();
        Self {
            state,
            handlers,
            poll_interval,
        }
    }

    fn job_types(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }

    pub async fn run(&self) {
        info!(
            job_types = ?self.job_types(),
            poll_seconds = self.poll_interval.as_secs(),
            "worker started"
        );
        self.recover_stalled();

        loop {
            match self.tick().await {
                Ok(true) => {}
                Ok(false) => sleep(self.poll_interval).await,
                Err(err) => {
                    error!(error = %err, "worker tick failed");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    fn recover_stalled(&self) {
        let stalled_before = Utc::now() - ChronoDuration::minutes(STALLED_AFTER_MINUTES);
        let result = self
            .state
            .db()
            .map_err(|err| err.to_string())
            .and_then(|mut conn| {
                requeue_stalled_jobs(&mut conn, &self.job_types(), stalled_before)
                    .map_err(|err| err.to_string())
            });
        match result {
            Ok(0) => {}
            Ok(count) => warn!(count, "requeued stalled jobs"),
            Err(err) => error!(error = %err, "failed to requeue stalled jobs"),
        }
    }

    /// Runs at most one job. `Ok(true)` means a job was processed and the queue may hold more.
    pub async fn tick(&self) -> Result<bool, JobQueueError> {
        let job_types = self.job_types();
        if job_types.is_empty() {
            return Ok(false);
        }

        let reserved = match self.state.db() {
            Ok(mut conn) => reserve_job(&mut conn, &job_types)?,
            Err(err) => {
                error!(error = %err, "failed to obtain database connection in worker");
                return Ok(false);
            }
        };
        let Some(job) = reserved else {
            return Ok(false);
        };

        let execution = match self.handlers.get(job.job_type.as_str()) {
            Some(handler) => handler.handle(self.state.clone(), job.clone()).await,
            None => JobExecution::Failed {
                error: "no handler registered".to_string(),
            },
        };
        match &execution {
            JobExecution::Success => {
                info!(job_id = %job.id, job_type = %job.job_type, "job completed successfully")
            }
            JobExecution::Retry { error, .. } => {
                warn!(job_id = %job.id, job_type = %job.job_type, %error, "job will retry")
            }
            JobExecution::Failed { error } => {
                error!(job_id = %job.id, job_type = %job.job_type, %error, "job failed")
            }
        }

        match self.state.db() {
            Ok(mut conn) => {
                if !complete_job(&mut conn, job.id, &execution.into())? {
                    warn!(job_id = %job.id, "job changed state while running; outcome not recorded");
                }
            }
            Err(err) => error!(job_id = %job.id, error = %err, "failed to record job outcome"),
        }
        Ok(true)
    }
}

pub fn default_handlers() -> Vec<Arc<dyn JobHandler>> {
    vec![Arc::new(notifications::SendScheduledNotificationJob::new())]
}
