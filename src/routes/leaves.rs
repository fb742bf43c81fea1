use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::leaves::{self, LeaveError, LeaveListing, LeaveScope, LeaveSubmission};
use crate::notifications::{approver_ids, notify_best_effort, NotificationMessage};
use crate::state::AppState;
use crate::utils::json::JsonBody;
use crate::types::{LeaveDecision, LeaveStatus, Role};

const REQUESTER_ROLES: &[Role] = &[Role::User, Role::Collaborateur];
const APPROVER_ROLES: &[Role] = &[Role::Manager, Role::Admin];

impl From<LeaveError> for AppError {
    fn from(value: LeaveError) -> Self {
        match value {
            LeaveError::InvalidInput(message) => AppError::bad_request(message),
            LeaveError::NotFound => AppError::not_found_with("Leave request not found."),
            LeaveError::NotPending(_) => AppError::bad_request("Leave request is not pending."),
            LeaveError::Database(err) => AppError::internal(err),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRequesterResponse {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub leave_type: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub description: Option<String>,
    pub status: LeaveStatus,
    pub submitted_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<Uuid>,
    pub user: LeaveRequesterResponse,
}

impl From<LeaveListing> for LeaveResponse {
    fn from(listing: LeaveListing) -> Self {
        let LeaveListing { request, requester } = listing;
        Self {
            status: request.status(),
            id: request.id,
            user_id: request.user_id,
            leave_type: request.leave_type,
            start_date: request.start_date,
            end_date: request.end_date,
            description: request.description,
            submitted_at: request.submitted_at,
            decided_at: request.decided_at,
            decided_by: request.decided_by,
            user: LeaveRequesterResponse {
                id: requester.id,
                first_name: requester.first_name,
                last_name: requester.last_name,
                email: requester.email,
            },
        }
    }
}

#[derive(Deserialize)]
pub struct LeaveListQuery {
    pub status: Option<String>,
}

pub async fn list_leaves(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Query(query): Query<LeaveListQuery>,
) -> AppResult<Json<Vec<LeaveResponse>>> {
    let status = query
        .status
        .as_deref()
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| {
            raw.parse::<LeaveStatus>()
                .map_err(|_| AppError::bad_request("Invalid leave status."))
        })
        .transpose()?;

    let scope = if caller.role.is_approver() {
        LeaveScope::Company(caller.company_id)
    } else {
        LeaveScope::Own(caller.user_id)
    };

    let mut conn = state.db()?;
    let listings = leaves::list_leaves(&mut conn, scope, status)?;
    Ok(Json(listings.into_iter().map(LeaveResponse::from).collect()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitLeaveRequest {
    #[serde(rename = "type")]
    pub leave_type: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub description: Option<String>,
}

pub async fn submit_leave(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    JsonBody(payload): JsonBody<SubmitLeaveRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    caller.require_role(REQUESTER_ROLES)?;

    let (request, approvers) = {
        let mut conn = state.db()?;
        let request = leaves::submit_leave(
            &mut conn,
            caller.user_id,
            LeaveSubmission {
                leave_type: payload.leave_type,
                start_date: payload.start_date,
                end_date: payload.end_date,
                description: payload.description,
            },
        )?;
        let approvers =
            approver_ids(&mut conn, caller.company_id, caller.user_id).unwrap_or_else(|err| {
                warn!(leave_request_id = %request.id, error = %err, "failed to load approvers");
                Vec::new()
            });
        (request, approvers)
    };

    notify_best_effort(
        &state,
        NotificationMessage::new(
            "New leave request",
            format!(
                "{} requested {} leave from {} to {}.",
                caller.email, request.leave_type, request.start_date, request.end_date
            ),
        )
        .with_data(json!({ "leaveRequestId": request.id })),
        approvers,
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Leave request submitted successfully.",
            "leaveRequestId": request.id,
        })),
    ))
}

async fn decide(
    state: AppState,
    caller: AuthenticatedUser,
    request_id: Uuid,
    decision: LeaveDecision,
) -> AppResult<Json<Value>> {
    caller.require_role(APPROVER_ROLES)?;

    let request = {
        let mut conn = state.db()?;
        leaves::decide_leave(
            &mut conn,
            request_id,
            caller.company_id,
            caller.user_id,
            decision,
        )?
    };

    let (title, outcome, message) = match decision {
        LeaveDecision::Approve => ("Leave request approved", "approved", "Leave request approved."),
        LeaveDecision::Reject => ("Leave request rejected", "rejected", "Leave request rejected."),
    };
    notify_best_effort(
        &state,
        NotificationMessage::new(
            title,
            format!(
                "Your {} leave from {} to {} has been {}.",
                request.leave_type, request.start_date, request.end_date, outcome
            ),
        )
        .with_data(json!({ "leaveRequestId": request.id, "status": outcome })),
        vec![request.user_id],
    )
    .await;

    Ok(Json(json!({ "message": message })))
}

pub async fn approve_leave(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    decide(state, caller, request_id, LeaveDecision::Approve).await
}

pub async fn reject_leave(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    decide(state, caller, request_id, LeaveDecision::Reject).await
}
