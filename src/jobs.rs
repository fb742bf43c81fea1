use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Job, NewJob};
use crate::schema::jobs;

pub const STATUS_QUEUED: &str = "queued";
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_SUCCEEDED: &str = "succeeded";
pub const STATUS_FAILED: &str = "failed";
pub const STATUS_CANCELLED: &str = "cancelled";

pub const JOB_SEND_NOTIFICATION: &str = "send-notification";

#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("job not found")]
    NotFound,
    #[error("job is {0} and can no longer be cancelled")]
    NotCancellable(String),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

pub type JobQueueResult<T> = Result<T, JobQueueError>;

pub fn enqueue_job(
    conn: &mut PgConnection,
    job_type: &str,
    payload: Value,
    run_after: Option<DateTime<Utc>>,
) -> JobQueueResult<Job> {
    let new_job = NewJob {
        id: Uuid::new_v4(),
        job_type: job_type.to_string(),
        payload,
        status: STATUS_QUEUED.to_string(),
        run_after: run_after.unwrap_or_else(Utc::now),
    };

    let job = diesel::insert_into(jobs::table)
        .values(&new_job)
        .get_result(conn)?;
    Ok(job)
}

pub fn reserve_job(conn: &mut PgConnection, job_types: &[&str]) -> JobQueueResult<Option<Job>> {
    let now = Utc::now();

    conn.transaction(|conn| {
        let job_opt = jobs::table
            .filter(jobs::status.eq(STATUS_QUEUED))
            .filter(jobs::run_after.le(now))
            .filter(jobs::job_type.eq_any(job_types))
            .order(jobs::run_after.asc())
            .for_update()
            .skip_locked()
            .first::<Job>(conn)
            .optional()?;

        match job_opt {
            Some(job) => {
                let reserved = diesel::update(jobs::table.find(job.id))
                    .set((
                        jobs::status.eq(STATUS_PROCESSING),
                        jobs::attempts.eq(job.attempts + 1),
                        jobs::updated_at.eq(now),
                    ))
                    .get_result::<Job>(conn)?;
                Ok::<Option<Job>, diesel::result::Error>(Some(reserved))
            }
            None => Ok(None),
        }
    })
    .map_err(JobQueueError::from)
}

/// Terminal or retry transition written after a handler ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobCompletion {
    Succeeded,
    RetryAt {
        run_after: DateTime<Utc>,
        error: String,
    },
    Failed {
        error: String,
    },
}

impl JobCompletion {
    pub fn retry_in(delay: Duration, error: impl Into<String>) -> Self {
        let delay = ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::seconds(30));
        JobCompletion::RetryAt {
            run_after: Utc::now() + delay,
            error: error.into(),
        }
    }
}

/// Only a job still marked `processing` is touched, so a cancelled job stays cancelled.
pub fn complete_job(
    conn: &mut PgConnection,
    job_id: Uuid,
    completion: &JobCompletion,
) -> JobQueueResult<bool> {
    let target = jobs::table
        .find(job_id)
        .filter(jobs::status.eq(STATUS_PROCESSING));
    let now = Utc::now();

    let updated = match completion {
        JobCompletion::Succeeded => diesel::update(target)
            .set((
                jobs::status.eq(STATUS_SUCCEEDED),
                jobs::last_error.eq::<Option<String>>(None),
                jobs::updated_at.eq(now),
            ))
            .execute(conn)?,
        JobCompletion::RetryAt { run_after, error } => diesel::update(target)
            .set((
                jobs::status.eq(STATUS_QUEUED),
                jobs::run_after.eq(*run_after),
                jobs::last_error.eq(Some(error.as_str())),
                jobs::updated_at.eq(now),
            ))
            .execute(conn)?,
        JobCompletion::Failed { error } => diesel::update(target)
            .set((
                jobs::status.eq(STATUS_FAILED),
                jobs::last_error.eq(Some(error.as_str())),
                jobs::updated_at.eq(now),
            ))
            .execute(conn)?,
    };
    Ok(updated > 0)
}

/// Puts jobs left in `processing` by a crashed worker back in the queue.
pub fn requeue_stalled_jobs(
    conn: &mut PgConnection,
    job_types: &[&str],
    stalled_before: DateTime<Utc>,
) -> JobQueueResult<usize> {
    let requeued = diesel::update(
        jobs::table
            .filter(jobs::status.eq(STATUS_PROCESSING))
            .filter(jobs::job_type.eq_any(job_types))
            .filter(jobs::updated_at.lt(stalled_before)),
    )
    .set((
        jobs::status.eq(STATUS_QUEUED),
        jobs::last_error.eq(Some("worker stopped while processing")),
        jobs::updated_at.eq(Utc::now()),
    ))
    .execute(conn)?;
    Ok(requeued)
}

/// Queued jobs of one type, soonest first.
pub fn list_queued_jobs(conn: &mut PgConnection, job_type: &str) -> JobQueueResult<Vec<Job>> {
    let jobs = jobs::table
        .filter(jobs::job_type.eq(job_type))
        .filter(jobs::status.eq(STATUS_QUEUED))
        .order(jobs::run_after.asc())
        .load(conn)?;
    Ok(jobs)
}

/// Only a job still waiting in the queue can be cancelled.
pub fn cancel_job(conn: &mut PgConnection, job_id: Uuid, job_type: &str) -> JobQueueResult<Job> {
    conn.transaction(|conn| {
        let job: Job = jobs::table
            .find(job_id)
            .filter(jobs::job_type.eq(job_type))
            .for_update()
            .first(conn)
            .optional()?
            .ok_or(JobQueueError::NotFound)?;

        if job.status != STATUS_QUEUED {
            return Err(JobQueueError::NotCancellable(job.status));
        }

        let cancelled = diesel::update(jobs::table.find(job.id))
            .set((
                jobs::status.eq(STATUS_CANCELLED),
                jobs::updated_at.eq(Utc::now()),
            ))
            .get_result(conn)?;
        Ok(cancelled)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_is_scheduled_after_the_delay() {
        let before = Utc::now();
        match JobCompletion::retry_in(Duration::from_secs(60), "pool timeout") {
            JobCompletion::RetryAt { run_after, error } => {
                assert!(run_after >= before + ChronoDuration::seconds(60));
                assert_eq!(error, "pool timeout");
            }
            other => panic!("unexpected completion: {other:?}"),
        }
    }
}
