use std::collections::HashSet;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::jobs::{self, JobQueueError, JOB_SEND_NOTIFICATION};
use crate::models::{Job, Notification};
use crate::notifications::{
    self, distinct_targets, NotificationError, NotificationMessage, ScheduledNotification,
};
use crate::schema::{documents, users};
use crate::state::AppState;
use crate::utils::json::JsonBody;
use crate::types::Role;

const SCHEDULED_NOT_FOUND: &str = "Scheduled notification not found.";

impl From<NotificationError> for AppError {
    fn from(value: NotificationError) -> Self {
        match value {
            NotificationError::NotFound => AppError::not_found_with("Notification not found."),
            NotificationError::Forbidden => AppError::forbidden(),
            NotificationError::Database(err) => AppError::internal(err),
            NotificationError::Queue(err) => AppError::internal(err),
            NotificationError::Payload(err) => AppError::internal(err),
        }
    }
}

impl From<JobQueueError> for AppError {
    fn from(value: JobQueueError) -> Self {
        match value {
            JobQueueError::NotFound => AppError::not_found_with(SCHEDULED_NOT_FOUND),
            JobQueueError::NotCancellable(status) => AppError::conflict(format!(
                "Scheduled notification is already {status}."
            )),
            JobQueueError::Database(err) => AppError::internal(err),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationResponse {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub related_document_id: Option<Uuid>,
    pub user_id: Uuid,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Notification> for NotificationResponse {
    fn from(n: Notification) -> Self {
        Self {
            id: n.id,
            title: n.title,
            content: n.content,
            related_document_id: n.related_document_id,
            user_id: n.user_id,
            is_read: n.is_read,
            read_at: n.read_at,
            created_at: n.created_at,
        }
    }
}

#[derive(Deserialize)]
pub struct NotificationListQuery {
    #[serde(default)]
    pub unread: bool,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Query(query): Query<NotificationListQuery>,
) -> AppResult<Json<Vec<NotificationResponse>>> {
    let mut conn = state.db()?;
    let rows = notifications::list_for_user(&mut conn, caller.user_id, query.unread)?;
    Ok(Json(rows.into_iter().map(NotificationResponse::from).collect()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotificationRequest {
    pub title: String,
    pub content: String,
    pub user_ids: Vec<Uuid>,
    pub related_document_id: Option<Uuid>,
    pub send_at: Option<DateTime<Utc>>,
}

/// Recipients and the related document must belong to the caller's company.
fn validate_targets(
    conn: &mut PgConnection,
    caller: &AuthenticatedUser,
    payload: &CreateNotificationRequest,
) -> AppResult<Vec<Uuid>> {
    let targets = distinct_targets(&payload.user_ids);
    if targets.is_empty() {
        return Err(AppError::bad_request("At least one recipient is required."));
    }

    let known: HashSet<Uuid> = users::table
        .filter(users::id.eq_any(&targets))
        .filter(users::company_id.eq(caller.company_id))
        .select(users::id)
        .load::<Uuid>(conn)?
        .into_iter()
        .collect();
    if targets.iter().any(|id| !known.contains(id)) {
        return Err(AppError::bad_request(
            "All recipients must belong to your company.",
        ));
    }

    if let Some(document_id) = payload.related_document_id {
        let exists: bool = diesel::select(diesel::dsl::exists(
            documents::table
                .find(document_id)
                .filter(documents::company_id.eq(caller.company_id)),
        ))
        .get_result(conn)?;
        if !exists {
            return Err(AppError::not_found_with("Document not found."));
        }
    }
    Ok(targets)
}

pub async fn create_notification(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    JsonBody(payload): JsonBody<CreateNotificationRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    caller.require_role(&[Role::Admin])?;
    let title = payload.title.trim();
    let content = payload.content.trim();
    if title.is_empty() || content.is_empty() {
        return Err(AppError::bad_request("Title and content are required."));
    }

    let mut message = NotificationMessage::new(title, content);
    if let Some(document_id) = payload.related_document_id {
        message = message.with_document(document_id);
    }

    let mut conn = state.db()?;
    let targets = validate_targets(&mut conn, &caller, &payload)?;

    if let Some(send_at) = payload.send_at.filter(|at| *at > Utc::now()) {
        let job = notifications::schedule_notification(
            &mut conn,
            &ScheduledNotification {
                message,
                user_ids: targets,
                company_id: caller.company_id,
                scheduled_by: caller.user_id,
            },
            send_at,
        )?;
        return Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "message": "Notification scheduled.",
                "jobId": job.id,
                "sendAt": job.run_after,
            })),
        ));
    }
    drop(conn);

    let outcome = notifications::send_notification(&state, &message, &targets).await?;
    let ids: Vec<Uuid> = outcome.notifications.iter().map(|n| n.id).collect();
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Notification created successfully.",
            "notificationId": ids.first(),
            "notificationIds": ids,
        })),
    ))
}

pub async fn mark_notification_read(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(notification_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;
    let notification = notifications::mark_as_read(&mut conn, notification_id, caller.user_id)?;
    Ok(Json(json!({
        "message": "Notification marked as read.",
        "readAt": notification.read_at,
    })))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledNotificationResponse {
    pub id: Uuid,
    pub send_at: DateTime<Utc>,
    pub title: String,
    pub content: String,
    pub related_document_id: Option<Uuid>,
    pub user_ids: Vec<Uuid>,
    pub scheduled_by: Uuid,
    pub attempts: i32,
    pub last_error: Option<String>,
}

fn scheduled_for_company(job: &Job, company_id: Uuid) -> Option<ScheduledNotification> {
    match ScheduledNotification::from_job(job) {
        Ok(scheduled) if scheduled.company_id == company_id => Some(scheduled),
        Ok(_) => None,
        Err(err) => {
            warn!(job_id = %job.id, error = %err, "unreadable scheduled notification payload");
            None
        }
    }
}

pub async fn list_scheduled_notifications(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
) -> AppResult<Json<Vec<ScheduledNotificationResponse>>> {
    caller.require_role(&[Role::Admin])?;
    let mut conn = state.db()?;
    let queued = jobs::list_queued_jobs(&mut conn, JOB_SEND_NOTIFICATION)?;

    let response = queued
        .iter()
        .filter_map(|job| {
            scheduled_for_company(job, caller.company_id).map(|scheduled| {
                ScheduledNotificationResponse {
                    id: job.id,
                    send_at: job.run_after,
                    title: scheduled.message.title,
                    content: scheduled.message.content,
                    related_document_id: scheduled.message.related_document_id,
                    user_ids: scheduled.user_ids,
                    scheduled_by: scheduled.scheduled_by,
                    attempts: job.attempts,
                    last_error: job.last_error.clone(),
                }
            })
        })
        .collect();
    Ok(Json(response))
}

pub async fn cancel_scheduled_notification(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(job_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    caller.require_role(&[Role::Admin])?;
    let mut conn = state.db()?;

    let job: Job = crate::schema::jobs::table
        .find(job_id)
        .filter(crate::schema::jobs::job_type.eq(JOB_SEND_NOTIFICATION))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::not_found_with(SCHEDULED_NOT_FOUND))?;
    if scheduled_for_company(&job, caller.company_id).is_none() {
        return Err(AppError::not_found_with(SCHEDULED_NOT_FOUND));
    }

    jobs::cancel_job(&mut conn, job_id, JOB_SEND_NOTIFICATION)?;
    Ok(Json(json!({ "message": "Scheduled notification cancelled." })))
}
