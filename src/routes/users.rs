use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{password, AuthenticatedUser};
use crate::error::{AppError, AppResult};
use crate::mailer::account_created_email;
use crate::models::{NewUser, User};
use crate::schema::{project_members, users};
use crate::signing;
use crate::state::AppState;
use crate::utils::json::JsonBody;
use crate::types::Role;

pub const EMAIL_IN_USE: &str = "Email already in use.";
const USER_NOT_FOUND: &str = "User not found.";
const MIN_PASSWORD_LEN: usize = 8;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
    pub company_id: Uuid,
    pub project_ids: Vec<Uuid>,
    pub has_push_token: bool,
    pub created_at: DateTime<Utc>,
}

pub fn to_user_response(user: User, project_ids: Vec<Uuid>) -> UserResponse {
    UserResponse {
        role: user.role(),
        has_push_token: user.push_token.as_deref().is_some_and(|t| !t.is_empty()),
        id: user.id,
        first_name: user.first_name,
        last_name: user.last_name,
        email: user.email,
        company_id: user.company_id,
        project_ids,
        created_at: user.created_at,
    }
}

pub fn load_user_response(conn: &mut PgConnection, user: User) -> AppResult<UserResponse> {
    let project_ids = project_members::table
        .filter(project_members::user_id.eq(user.id))
        .select(project_members::project_id)
        .load::<Uuid>(conn)?;
    Ok(to_user_response(user, project_ids))
}

pub fn normalize_email(raw: &str) -> AppResult<String> {
    let email = raw.trim().to_lowercase();
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid {
        return Err(AppError::bad_request("A valid email is required."));
    }
    Ok(email)
}

fn required_name(value: &str, field: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::bad_request(format!("{field} is required.")));
    }
    Ok(trimmed.to_owned())
}

pub fn parse_role(raw: &str) -> AppResult<Role> {
    raw.parse()
        .map_err(|_| AppError::bad_request("Invalid role."))
}

pub fn validate_new_password(raw: &str) -> AppResult<()> {
    if raw.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::bad_request(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters."
        )));
    }
    Ok(())
}

/// Fields of a new account before hashing.
pub struct AccountRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
    pub company_id: Uuid,
}

fn map_unique_email(err: DieselError) -> AppError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            AppError::conflict(EMAIL_IN_USE)
        }
        other => AppError::from(other),
    }
}

/// Inserts the account with an argon2 hash of `password`. Duplicate emails are a 409.
pub fn insert_account(
    conn: &mut PgConnection,
    account: AccountRequest,
    password: &str,
) -> AppResult<User> {
    let password_hash = password::hash_password(password)?;
    let new_user = NewUser {
        id: Uuid::new_v4(),
        first_name: required_name(&account.first_name, "First name")?,
        last_name: required_name(&account.last_name, "Last name")?,
        email: normalize_email(&account.email)?,
        password_hash,
        role: account.role.as_str().to_owned(),
        company_id: account.company_id,
    };

    let user = diesel::insert_into(users::table)
        .values(&new_user)
        .get_result::<User>(conn)
        .map_err(map_unique_email)?;
    info!(user_id = %user.id, role = %account.role, "user account created");
    Ok(user)
}

/// Sends the credentials mail. Failures are logged and do not fail the request.
pub async fn send_account_email(state: &AppState, user: &User, password: &str) {
    let email = account_created_email(
        &user.email,
        &user.first_name,
        password,
        &state.config.login_link(),
    );
    if let Err(err) = state.mailer.send(email).await {
        warn!(user_id = %user.id, error = %err, "failed to send account email");
    }
}

/// Loads a user of the caller's company; anyone else is reported missing.
fn find_company_user(conn: &mut PgConnection, company_id: Uuid, user_id: Uuid) -> AppResult<User> {
    users::table
        .find(user_id)
        .filter(users::company_id.eq(company_id))
        .first::<User>(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found_with(USER_NOT_FOUND))
}

pub async fn list_users(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
) -> AppResult<Json<Vec<UserResponse>>> {
    caller.require_role(&[Role::Admin])?;
    let mut conn = state.db()?;

    let company_users: Vec<User> = users::table
        .filter(users::company_id.eq(caller.company_id))
        .order((users::last_name.asc(), users::first_name.asc()))
        .load(&mut conn)?;

    let ids: Vec<Uuid> = company_users.iter().map(|u| u.id).collect();
    let memberships: Vec<(Uuid, Uuid)> = project_members::table
        .filter(project_members::user_id.eq_any(&ids))
        .select((project_members::user_id, project_members::project_id))
        .load(&mut conn)?;

    let mut projects_by_user: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for (user_id, project_id) in memberships {
        projects_by_user.entry(user_id).or_default().push(project_id);
    }

    let response = company_users
        .into_iter()
        .map(|user| {
            let project_ids = projects_by_user.remove(&user.id).unwrap_or_default();
            to_user_response(user, project_ids)
        })
        .collect();
    Ok(Json(response))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: String,
    pub password: Option<String>,
}

pub async fn create_user(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    JsonBody(payload): JsonBody<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    caller.require_role(&[Role::Admin])?;
    let role = parse_role(&payload.role)?;

    let (password, generated) = match payload.password {
        Some(password) => {
            validate_new_password(&password)?;
            (password, false)
        }
        None => (password::generate_password(), true),
    };

    let user = {
        let mut conn = state.db()?;
        insert_account(
            &mut conn,
            AccountRequest {
                first_name: payload.first_name,
                last_name: payload.last_name,
                email: payload.email,
                role,
                company_id: caller.company_id,
            },
            &password,
        )?
    };

    if generated {
        send_account_email(&state, &user, &password).await;
    }

    Ok((StatusCode::CREATED, Json(to_user_response(user, Vec::new()))))
}

pub async fn get_user(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<UserResponse>> {
    if caller.user_id != user_id {
        caller.require_role(&[Role::Admin])?;
    }
    let mut conn = state.db()?;
    let user = find_company_user(&mut conn, caller.company_id, user_id)?;
    Ok(Json(load_user_response(&mut conn, user)?))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub password: Option<String>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = users)]
struct UserChangeset {
    first_name: Option<String>,
    last_name: Option<String>,
    email: Option<String>,
    role: Option<String>,
    password_hash: Option<String>,
    updated_at: Option<DateTime<Utc>>,
}

pub async fn update_user(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
    JsonBody(payload): JsonBody<UpdateUserRequest>,
) -> AppResult<Json<UserResponse>> {
    caller.require_role(&[Role::Admin])?;
    let mut conn = state.db()?;
    find_company_user(&mut conn, caller.company_id, user_id)?;

    let mut changes = UserChangeset {
        updated_at: Some(Utc::now()),
        ..Default::default()
    };
    if let Some(first_name) = payload.first_name.as_deref() {
        changes.first_name = Some(required_name(first_name, "First name")?);
    }
    if let Some(last_name) = payload.last_name.as_deref() {
        changes.last_name = Some(required_name(last_name, "Last name")?);
    }
    if let Some(email) = payload.email.as_deref() {
        changes.email = Some(normalize_email(email)?);
    }
    if let Some(role) = payload.role.as_deref() {
        let role = parse_role(role)?;
        if user_id == caller.user_id && role != Role::Admin {
            return Err(AppError::bad_request("You cannot remove your own Admin role."));
        }
        changes.role = Some(role.as_str().to_owned());
    }
    if let Some(new_password) = payload.password.as_deref() {
        validate_new_password(new_password)?;
        changes.password_hash = Some(password::hash_password(new_password)?);
    }

    let user = diesel::update(users::table.find(user_id))
        .set(&changes)
        .get_result::<User>(&mut conn)
        .map_err(map_unique_email)?;
    Ok(Json(load_user_response(&mut conn, user)?))
}

pub async fn delete_user(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    caller.require_role(&[Role::Admin])?;
    if caller.user_id == user_id {
        return Err(AppError::bad_request("You cannot delete your own account."));
    }
    let mut conn = state.db()?;
    find_company_user(&mut conn, caller.company_id, user_id)?;

    let unsigned = conn.transaction::<_, DieselError, _>(|conn| {
        let unsigned = signing::remove_signer(conn, user_id)?;
        diesel::delete(users::table.find(user_id)).execute(conn)?;
        Ok(unsigned)
    })?;
    info!(
        user_id = %user_id,
        deleted_by = %caller.user_id,
        unsigned_documents = unsigned,
        "user deleted"
    );
    Ok(Json(json!({ "message": "User deleted successfully." })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushTokenRequest {
    pub push_token: Option<String>,
}

pub async fn update_push_token(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    JsonBody(payload): JsonBody<PushTokenRequest>,
) -> AppResult<Json<Value>> {
    let token = payload
        .push_token
        .map(|t| t.trim().to_owned())
        .filter(|t| !t.is_empty());
    let mut conn = state.db()?;

    let updated = diesel::update(users::table.find(caller.user_id))
        .set((
            users::push_token.eq(token.as_deref()),
            users::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)?;
    if updated == 0 {
        return Err(AppError::not_found_with(USER_NOT_FOUND));
    }
    Ok(Json(json!({ "message": "Push token updated." })))
}
