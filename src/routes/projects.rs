use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{NewProject, NewProjectMember, Project, User};
use crate::notifications::{notify_best_effort, NotificationMessage};
use crate::schema::{project_members, projects, users};
use crate::state::AppState;
use crate::types::Role;
use crate::utils::json::{classify_nullable, JsonBody, NullableValue};

const PROJECT_MANAGERS: &[Role] = &[Role::Admin, Role::Manager];
const PROJECT_NOT_FOUND: &str = "Project not found.";
const END_BEFORE_START: &str = "End date cannot be before start date.";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMemberResponse {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectResponse {
    pub id: Uuid,
    pub name: String,
    pub location: String,
    pub company_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub member_ids: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<ProjectMemberResponse>>,
    pub created_at: DateTime<Utc>,
}

fn to_project_response(
    project: Project,
    member_ids: Vec<Uuid>,
    members: Option<Vec<ProjectMemberResponse>>,
) -> ProjectResponse {
    ProjectResponse {
        id: project.id,
        name: project.name,
        location: project.location,
        company_id: project.company_id,
        start_date: project.start_date,
        end_date: project.end_date,
        member_ids,
        members,
        created_at: project.created_at,
    }
}

pub fn find_company_project(
    conn: &mut PgConnection,
    company_id: Uuid,
    project_id: Uuid,
) -> AppResult<Project> {
    projects::table
        .find(project_id)
        .filter(projects::company_id.eq(company_id))
        .first::<Project>(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found_with(PROJECT_NOT_FOUND))
}

fn check_dates(start: NaiveDate, end: Option<NaiveDate>) -> AppResult<()> {
    match end {
        Some(end) if end < start => Err(AppError::bad_request(END_BEFORE_START)),
        _ => Ok(()),
    }
}

fn load_detail(conn: &mut PgConnection, project: Project) -> AppResult<ProjectResponse> {
    let members: Vec<User> = project_members::table
        .inner_join(users::table)
        .filter(project_members::project_id.eq(project.id))
        .order((users::last_name.asc(), users::first_name.asc()))
        .select(users::all_columns)
        .load(conn)?;

    let member_ids = members.iter().map(|m| m.id).collect();
    let members = members
        .into_iter()
        .map(|user| ProjectMemberResponse {
            role: user.role(),
            id: user.id,
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
        })
        .collect();
    Ok(to_project_response(project, member_ids, Some(members)))
}

pub async fn list_projects(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
) -> AppResult<Json<Vec<ProjectResponse>>> {
    let mut conn = state.db()?;
    let company_projects: Vec<Project> = projects::table
        .filter(projects::company_id.eq(caller.company_id))
        .order(projects::start_date.desc())
        .load(&mut conn)?;

    let ids: Vec<Uuid> = company_projects.iter().map(|p| p.id).collect();
    let memberships: Vec<(Uuid, Uuid)> = project_members::table
        .filter(project_members::project_id.eq_any(&ids))
        .select((project_members::project_id, project_members::user_id))
        .load(&mut conn)?;

    let mut members_by_project: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for (project_id, user_id) in memberships {
        members_by_project.entry(project_id).or_default().push(user_id);
    }

    let response = company_projects
        .into_iter()
        .map(|project| {
            let member_ids = members_by_project.remove(&project.id).unwrap_or_default();
            to_project_response(project, member_ids, None)
        })
        .collect();
    Ok(Json(response))
}

pub async fn get_project(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<ProjectResponse>> {
    let mut conn = state.db()?;
    let project = find_company_project(&mut conn, caller.company_id, project_id)?;
    Ok(Json(load_detail(&mut conn, project)?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    pub name: String,
    pub location: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

pub async fn create_project(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    JsonBody(payload): JsonBody<CreateProjectRequest>,
) -> AppResult<(StatusCode, Json<ProjectResponse>)> {
    caller.require_role(PROJECT_MANAGERS)?;
    let name = payload.name.trim();
    let location = payload.location.trim();
    if name.is_empty() || location.is_empty() {
        return Err(AppError::bad_request("Name and location are required."));
    }
    check_dates(payload.start_date, payload.end_date)?;

    let mut conn = state.db()?;
    let project = diesel::insert_into(projects::table)
        .values(&NewProject {
            id: Uuid::new_v4(),
            name: name.to_owned(),
            location: location.to_owned(),
            company_id: caller.company_id,
            start_date: payload.start_date,
            end_date: payload.end_date,
        })
        .get_result::<Project>(&mut conn)?;
    info!(project_id = %project.id, created_by = %caller.user_id, "project created");

    Ok((
        StatusCode::CREATED,
        Json(to_project_response(project, Vec::new(), Some(Vec::new()))),
    ))
}

#[derive(AsChangeset)]
#[diesel(table_name = projects)]
struct ProjectChangeset {
    name: Option<String>,
    location: Option<String>,
    start_date: Option<NaiveDate>,
    end_date: Option<Option<NaiveDate>>,
    updated_at: DateTime<Utc>,
}

fn parse_date(raw: &str, field: &str) -> AppResult<NaiveDate> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::bad_request(format!("{field} must be a date (YYYY-MM-DD).")))
}

fn optional_text(body: &Value, field: &str) -> AppResult<Option<String>> {
    match classify_nullable(field, body.get(field)).map_err(AppError::bad_request)? {
        NullableValue::Omitted => Ok(None),
        NullableValue::Null => Err(AppError::bad_request(format!("{field} cannot be null."))),
        NullableValue::String(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Err(AppError::bad_request(format!("{field} must not be empty.")));
            }
            Ok(Some(trimmed.to_owned()))
        }
    }
}

/// Partial update. `endDate: null` clears the end date; omitted fields stay as they are.
pub async fn update_project(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(project_id): Path<Uuid>,
    JsonBody(body): JsonBody<Value>,
) -> AppResult<Json<ProjectResponse>> {
    caller.require_role(PROJECT_MANAGERS)?;
    let mut conn = state.db()?;
    let existing = find_company_project(&mut conn, caller.company_id, project_id)?;

    let name = optional_text(&body, "name")?;
    let location = optional_text(&body, "location")?;
    let start_date = optional_text(&body, "startDate")?
        .map(|raw| parse_date(&raw, "startDate"))
        .transpose()?;
    let end_date = classify_nullable("endDate", body.get("endDate"))
        .map_err(AppError::bad_request)?
        .into_patch(|raw| parse_date(&raw, "endDate"))?;

    check_dates(
        start_date.unwrap_or(existing.start_date),
        end_date.unwrap_or(existing.end_date),
    )?;

    let project = diesel::update(projects::table.find(project_id))
        .set(&ProjectChangeset {
            name,
            location,
            start_date,
            end_date,
            updated_at: Utc::now(),
        })
        .get_result::<Project>(&mut conn)?;
    Ok(Json(load_detail(&mut conn, project)?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberRequest {
    pub user_id: Uuid,
}

pub async fn add_project_member(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(project_id): Path<Uuid>,
    JsonBody(payload): JsonBody<AddMemberRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    caller.require_role(PROJECT_MANAGERS)?;

    let (project, inserted) = {
        let mut conn = state.db()?;
        let project = find_company_project(&mut conn, caller.company_id, project_id)?;

        let same_company: bool = diesel::select(diesel::dsl::exists(
            users::table
                .find(payload.user_id)
                .filter(users::company_id.eq(caller.company_id)),
        ))
        .get_result(&mut conn)?;
        if !same_company {
            return Err(AppError::not_found_with("User not found."));
        }

        let inserted = diesel::insert_into(project_members::table)
            .values(&NewProjectMember {
                project_id,
                user_id: payload.user_id,
            })
            .on_conflict_do_nothing()
            .execute(&mut conn)?;
        (project, inserted)
    };

    if inserted == 0 {
        return Ok((
            StatusCode::OK,
            Json(json!({ "message": "User is already assigned to this project." })),
        ));
    }

    info!(project_id = %project_id, user_id = %payload.user_id, "user added to project");
    notify_best_effort(
        &state,
        NotificationMessage::new(
            "Project assignment",
            format!("You have been added to the project {}.", project.name),
        )
        .with_data(json!({ "projectId": project_id })),
        vec![payload.user_id],
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "User added to project." })),
    ))
}

pub async fn remove_project_member(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path((project_id, user_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<Value>> {
    caller.require_role(PROJECT_MANAGERS)?;
    let mut conn = state.db()?;
    find_company_project(&mut conn, caller.company_id, project_id)?;

    let removed = diesel::delete(
        project_members::table
            .filter(project_members::project_id.eq(project_id))
            .filter(project_members::user_id.eq(user_id)),
    )
    .execute(&mut conn)?;
    if removed == 0 {
        return Err(AppError::not_found_with("User is not assigned to this project."));
    }

    info!(project_id = %project_id, user_id = %user_id, "user removed from project");
    Ok(Json(json!({ "message": "User removed from project." })))
}
