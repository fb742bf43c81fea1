use chrono::{NaiveDate, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::models::{LeaveRequest, NewLeaveRequest, User};
use crate::schema::{leave_requests, users};
use crate::types::{LeaveDecision, LeaveStatus, NotPending};

pub const MAX_LEAVE_TYPE_LEN: usize = 50;

#[derive(Debug, Error)]
pub enum LeaveError {
    #[error("{0}")]
    InvalidInput(&'static str),
    #[error("leave request not found")]
    NotFound,
    #[error(transparent)]
    NotPending(#[from] NotPending),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

#[derive(Debug, Clone)]
pub struct LeaveSubmission {
    pub leave_type: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub description: Option<String>,
}

impl LeaveSubmission {
    pub fn validate(&self) -> Result<(), LeaveError> {
        let leave_type = self.leave_type.trim();
        if leave_type.is_empty() {
            return Err(LeaveError::InvalidInput("Leave type is required."));
        }
        if leave_type.chars().count() > MAX_LEAVE_TYPE_LEN {
            return Err(LeaveError::InvalidInput("Leave type is too long."));
        }
        if self.end_date < self.start_date {
            return Err(LeaveError::InvalidInput(
                "End date cannot be before start date.",
            ));
        }
        Ok(())
    }
}

/// Creates a `pending` request. Nothing is written when validation fails.
pub fn submit_leave(
    conn: &mut PgConnection,
    requester: Uuid,
    submission: LeaveSubmission,
) -> Result<LeaveRequest, LeaveError> {
    submission.validate()?;

    let description = submission
        .description
        .map(|text| text.trim().to_owned())
        .filter(|text| !text.is_empty());

    let new_request = NewLeaveRequest {
        id: Uuid::new_v4(),
        user_id: requester,
        leave_type: submission.leave_type.trim().to_owned(),
        start_date: submission.start_date,
        end_date: submission.end_date,
        description,
        status: LeaveStatus::Pending.as_str().to_owned(),
        submitted_at: Utc::now(),
    };

    let request = diesel::insert_into(leave_requests::table)
        .values(&new_request)
        .get_result::<LeaveRequest>(conn)?;
    info!(leave_request_id = %request.id, user_id = %requester, "leave request submitted");
    Ok(request)
}

/// Applies an approve/reject decision under a row lock.
/// Requests of users outside `company_id` are reported as missing.
pub fn decide_leave(
    conn: &mut PgConnection,
    request_id: Uuid,
    company_id: Uuid,
    decided_by: Uuid,
    decision: LeaveDecision,
) -> Result<LeaveRequest, LeaveError> {
    conn.transaction(|conn| {
        let request: LeaveRequest = leave_requests::table
            .inner_join(users::table)
            .filter(leave_requests::id.eq(request_id))
            .filter(users::company_id.eq(company_id))
            .select(leave_requests::all_columns)
            .for_update()
            .first(conn)
            .optional()?
            .ok_or(LeaveError::NotFound)?;

        let next = request.status().decide(decision)?;
        let now = Utc::now();

        let updated = diesel::update(leave_requests::table.find(request.id))
            .set((
                leave_requests::status.eq(next.as_str()),
                leave_requests::decided_at.eq(Some(now)),
                leave_requests::decided_by.eq(Some(decided_by)),
                leave_requests::updated_at.eq(now),
            ))
            .get_result::<LeaveRequest>(conn)?;

        info!(
            leave_request_id = %updated.id,
            status = %next,
            decided_by = %decided_by,
            "leave request decided"
        );
        Ok(updated)
    })
}

/// Who asked for what, as shown in listings.
#[derive(Debug, Clone)]
pub struct LeaveListing {
    pub request: LeaveRequest,
    pub requester: User,
}

#[derive(Debug, Clone, Copy)]
pub enum LeaveScope {
    /// Only the caller's own requests.
    Own(Uuid),
    /// Every request of the company.
    Company(Uuid),
}

pub fn list_leaves(
    conn: &mut PgConnection,
    scope: LeaveScope,
    status: Option<LeaveStatus>,
) -> Result<Vec<LeaveListing>, LeaveError> {
    let mut query = leave_requests::table
        .inner_join(users::table)
        .select((leave_requests::all_columns, users::all_columns))
        .order(leave_requests::submitted_at.desc())
        .into_boxed();

    query = match scope {
        LeaveScope::Own(user_id) => query.filter(leave_requests::user_id.eq(user_id)),
        LeaveScope::Company(company_id) => query.filter(users::company_id.eq(company_id)),
    };
    if let Some(status) = status {
        query = query.filter(leave_requests::status.eq(status.as_str()));
    }

    let rows = query.load::<(LeaveRequest, User)>(conn)?;
    Ok(rows
        .into_iter()
        .map(|(request, requester)| LeaveListing { request, requester })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(start: &str, end: &str) -> LeaveSubmission {
        LeaveSubmission {
            leave_type: "vacation".to_string(),
            start_date: start.parse().unwrap(),
            end_date: end.parse().unwrap(),
            description: None,
        }
    }

    #[test]
    fn same_day_leave_is_valid() {
        assert!(submission("2023-10-01", "2023-10-01").validate().is_ok());
    }

    #[test]
    fn end_before_start_is_invalid_input() {
        let err = submission("2023-10-05", "2023-10-01").validate().unwrap_err();
        assert!(matches!(
            err,
            LeaveError::InvalidInput("End date cannot be before start date.")
        ));
    }

    #[test]
    fn blank_type_is_rejected() {
        let mut leave = submission("2023-10-01", "2023-10-05");
        leave.leave_type = "   ".to_string();
        assert!(matches!(leave.validate(), Err(LeaveError::InvalidInput(_))));
    }
}
