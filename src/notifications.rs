use std::collections::HashSet;

use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::jobs::{self, JobQueueError, JOB_SEND_NOTIFICATION};
use crate::models::{Job, NewNotification, Notification};
use crate::push::PushMessage;
use crate::schema::{notifications, project_members, users};
use crate::state::AppState;
use crate::types::Role;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification not found")]
    NotFound,
    #[error("notification belongs to another user")]
    Forbidden,
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("job queue error: {0}")]
    Queue(#[from] JobQueueError),
    #[error("invalid notification payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// What gets stored and pushed. Also the payload of a scheduled `send-notification` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMessage {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub related_document_id: Option<Uuid>,
    #[serde(default)]
    pub data: Value,
}

impl NotificationMessage {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            related_document_id: None,
            data: Value::Null,
        }
    }

    pub fn with_document(mut self, document_id: Uuid) -> Self {
        self.related_document_id = Some(document_id);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    fn push_message(&self) -> PushMessage {
        let data = match (&self.data, self.related_document_id) {
            (Value::Null, Some(document_id)) => {
                serde_json::json!({ "relatedDocumentId": document_id })
            }
            (Value::Null, None) => Value::Object(Default::default()),
            (data, _) => data.clone(),
        };
        PushMessage {
            title: self.title.clone(),
            body: self.content.clone(),
            data,
        }
    }
}

#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub notifications: Vec<Notification>,
    pub pushed: usize,
    pub push_failures: usize,
}

/// Keeps the first occurrence of every id.
pub fn distinct_targets(user_ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = HashSet::with_capacity(user_ids.len());
    user_ids
        .iter()
        .copied()
        .filter(|id| seen.insert(*id))
        .collect()
}

/// One row per distinct existing target, all in one transaction.
pub fn persist_notifications(
    conn: &mut PgConnection,
    message: &NotificationMessage,
    user_ids: &[Uuid],
) -> Result<Vec<Notification>, NotificationError> {
    let targets = distinct_targets(user_ids);
    if targets.is_empty() {
        return Ok(Vec::new());
    }

    let rows = conn.transaction::<_, diesel::result::Error, _>(|conn| {
        let existing: HashSet<Uuid> = users::table
            .filter(users::id.eq_any(&targets))
            .select(users::id)
            .load::<Uuid>(conn)?
            .into_iter()
            .collect();

        let new_rows: Vec<NewNotification> = targets
            .iter()
            .filter(|id| existing.contains(id))
            .map(|user_id| NewNotification {
                id: Uuid::new_v4(),
                title: message.title.clone(),
                content: message.content.clone(),
                related_document_id: message.related_document_id,
                user_id: *user_id,
            })
            .collect();

        if new_rows.is_empty() {
            return Ok(Vec::new());
        }

        diesel::insert_into(notifications::table)
            .values(&new_rows)
            .get_results::<Notification>(conn)
    })?;

    Ok(rows)
}

/// Registered device tokens of `user_ids`, blank tokens skipped.
pub fn push_tokens(conn: &mut PgConnection, user_ids: &[Uuid]) -> QueryResult<Vec<(Uuid, String)>> {
    Ok(users::table
        .filter(users::id.eq_any(user_ids))
        .filter(users::push_token.is_not_null())
        .select((users::id, users::push_token))
        .load::<(Uuid, Option<String>)>(conn)?
        .into_iter()
        .filter_map(|(id, token)| token.filter(|t| !t.is_empty()).map(|t| (id, t)))
        .collect())
}

/// Persists the rows, then pushes to every registered device token.
/// Push failures are logged and never undo the stored rows. An `Err` means
/// nothing was stored, so callers may retry it.
pub async fn send_notification(
    state: &AppState,
    message: &NotificationMessage,
    user_ids: &[Uuid],
) -> anyhow::Result<DispatchOutcome> {
    let (notifications, tokens) = {
        let mut conn = state.db()?;
        let notifications = persist_notifications(&mut conn, message, user_ids)?;
        let recipients: Vec<Uuid> = notifications.iter().map(|n| n.user_id).collect();
        // Rows are committed at this point, so a failed lookup only skips the pushes.
        let tokens = push_tokens(&mut conn, &recipients).unwrap_or_else(|err| {
            warn!(error = %err, recipients = recipients.len(), "failed to load push tokens");
            Vec::new()
        });
        (notifications, tokens)
    };

    let push = message.push_message();
    let deliveries = tokens.iter().map(|(user_id, token)| {
        let sender = state.push.clone();
        let push = &push;
        async move { (*user_id, sender.send(token, push).await) }
    });

    let mut outcome = DispatchOutcome {
        notifications,
        ..Default::default()
    };
    for (user_id, result) in join_all(deliveries).await {
        match result {
            Ok(()) => outcome.pushed += 1,
            Err(err) => {
                outcome.push_failures += 1;
                warn!(user_id = %user_id, error = %err, "push delivery failed");
            }
        }
    }

    info!(
        title = %message.title,
        stored = outcome.notifications.len(),
        pushed = outcome.pushed,
        push_failures = outcome.push_failures,
        "notification dispatched"
    );
    Ok(outcome)
}

/// Best-effort dispatch for side effects of other operations.
pub async fn notify_best_effort(state: &AppState, message: NotificationMessage, user_ids: Vec<Uuid>) {
    if user_ids.is_empty() {
        return;
    }
    if let Err(err) = send_notification(state, &message, &user_ids).await {
        warn!(title = %message.title, error = %err, "failed to dispatch notification");
    }
}

/// Payload of a `send-notification` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledNotification {
    pub message: NotificationMessage,
    pub user_ids: Vec<Uuid>,
    pub company_id: Uuid,
    pub scheduled_by: Uuid,
}

impl ScheduledNotification {
    pub fn from_job(job: &Job) -> Result<Self, serde_json::Error> {
        serde_json::from_value(job.payload.clone())
    }
}

/// Queues delivery for `send_at`; the worker performs the same dispatch when it is due.
pub fn schedule_notification(
    conn: &mut PgConnection,
    scheduled: &ScheduledNotification,
    send_at: DateTime<Utc>,
) -> Result<Job, NotificationError> {
    let payload = serde_json::to_value(scheduled)?;
    let job = jobs::enqueue_job(conn, JOB_SEND_NOTIFICATION, payload, Some(send_at))?;
    info!(job_id = %job.id, send_at = %send_at, recipients = scheduled.user_ids.len(), "notification scheduled");
    Ok(job)
}

/// Flips `is_read` once. Marking an already-read notification keeps the original `read_at`.
pub fn mark_as_read(
    conn: &mut PgConnection,
    notification_id: Uuid,
    user_id: Uuid,
) -> Result<Notification, NotificationError> {
    let notification: Notification = notifications::table
        .find(notification_id)
        .first(conn)
        .optional()?
        .ok_or(NotificationError::NotFound)?;

    if notification.user_id != user_id {
        return Err(NotificationError::Forbidden);
    }
    if notification.is_read {
        return Ok(notification);
    }

    let updated = diesel::update(
        notifications::table
            .find(notification_id)
            .filter(notifications::is_read.eq(false)),
    )
    .set((
        notifications::is_read.eq(true),
        notifications::read_at.eq(Some(Utc::now())),
    ))
    .get_result::<Notification>(conn)
    .optional()?;

    match updated {
        Some(notification) => Ok(notification),
        None => Ok(notifications::table.find(notification_id).first(conn)?),
    }
}

pub fn list_for_user(
    conn: &mut PgConnection,
    user_id: Uuid,
    unread_only: bool,
) -> Result<Vec<Notification>, NotificationError> {
    let mut query = notifications::table
        .filter(notifications::user_id.eq(user_id))
        .order(notifications::created_at.desc())
        .into_boxed();
    if unread_only {
        query = query.filter(notifications::is_read.eq(false));
    }
    Ok(query.load(conn)?)
}

/// Admins and Managers of the company, minus the requester.
pub fn approver_ids(
    conn: &mut PgConnection,
    company_id: Uuid,
    exclude: Uuid,
) -> QueryResult<Vec<Uuid>> {
    let roles = [Role::Admin.as_str(), Role::Manager.as_str()];
    users::table
        .filter(users::company_id.eq(company_id))
        .filter(users::role.eq_any(roles))
        .filter(users::id.ne(exclude))
        .select(users::id)
        .load(conn)
}

pub fn project_member_ids(conn: &mut PgConnection, project_id: Uuid) -> QueryResult<Vec<Uuid>> {
    project_members::table
        .filter(project_members::project_id.eq(project_id))
        .select(project_members::user_id)
        .load(conn)
}
