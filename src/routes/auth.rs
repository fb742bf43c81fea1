use std::sync::OnceLock;

use axum::{extract::State, http::StatusCode, Json};
use chrono::{Duration as ChronoDuration, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use super::users::{
    insert_account, load_user_response, normalize_email, parse_role, send_account_email,
    validate_new_password, AccountRequest, UserResponse,
};
use crate::auth::{password, reset, AuthenticatedUser};
use crate::error::{AppError, AppResult};
use crate::mailer::password_reset_email;
use crate::models::User;
use crate::schema::users;
use crate::state::AppState;
use crate::utils::json::JsonBody;
use crate::types::Role;

pub const INVALID_CREDENTIALS: &str = "Invalid email or password.";
pub const RESET_LINK_SENT: &str = "Password reset link sent.";
pub const INVALID_RESET_TOKEN: &str = "Invalid or expired password reset token.";

static DUMMY_HASH: OnceLock<Option<String>> = OnceLock::new();

/// Verifies against a throwaway hash so unknown emails cost the same as wrong passwords.
fn burn_password_check(candidate: &str) {
    let hash = DUMMY_HASH.get_or_init(|| password::hash_password("not-a-real-password").ok());
    if let Some(hash) = hash {
        let _ = password::verify_password(candidate, hash);
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: UserResponse,
}

pub async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let (Some(email), Some(candidate)) = (non_blank(payload.email), non_blank(payload.password))
    else {
        return Err(AppError::bad_request("Email and password are required."));
    };
    let email = email.trim().to_lowercase();

    let mut conn = state.db()?;
    let user: Option<User> = users::table
        .filter(users::email.eq(&email))
        .first(&mut conn)
        .optional()?;

    let Some(user) = user else {
        burn_password_check(&candidate);
        return Err(AppError::unauthorized_with(INVALID_CREDENTIALS));
    };

    let valid = password::verify_password(&candidate, &user.password_hash).unwrap_or(false);
    if !valid {
        warn!(user_id = %user.id, "login failed: wrong password");
        return Err(AppError::unauthorized_with(INVALID_CREDENTIALS));
    }

    let token = state.jwt.generate_token(&user)?;
    info!(user_id = %user.id, "user logged in");

    Ok(Json(LoginResponse {
        token,
        token_type: "Bearer".to_string(),
        expires_in: state.jwt.expires_in_seconds(),
        user: load_user_response(&mut conn, user)?,
    }))
}

pub async fn me(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
) -> AppResult<Json<UserResponse>> {
    let mut conn = state.db()?;
    let user: User = users::table
        .find(caller.user_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::unauthorized)?;
    Ok(Json(load_user_response(&mut conn, user)?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: String,
}

pub async fn register(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    caller.require_role(&[Role::Admin])?;
    let role = parse_role(&payload.role)?;
    let generated = password::generate_password();

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
            &generated,
        )?
    };

    send_account_email(&state, &user, &generated).await;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "User registered successfully.",
            "userId": user.id,
        })),
    ))
}

#[derive(Deserialize)]
pub struct ResetRequest {
    pub email: Option<String>,
}

/// Always answers the same way whether or not the email belongs to an account.
pub async fn request_password_reset(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<ResetRequest>,
) -> AppResult<Json<Value>> {
    let response = Json(json!({ "message": RESET_LINK_SENT }));

    let Some(email) = payload
        .email
        .as_deref()
        .and_then(|raw| normalize_email(raw).ok())
    else {
        return Ok(response);
    };

    let target = {
        let mut conn = state.db()?;
        let user: Option<User> = users::table
            .filter(users::email.eq(&email))
            .first(&mut conn)
            .optional()?;

        match user {
            Some(user) => {
                let (token, token_hash) = reset::generate_reset_token();
                let expires_at =
                    Utc::now() + ChronoDuration::hours(state.config.password_reset_expiry_hours);
                diesel::update(users::table.find(user.id))
                    .set((
                        users::password_reset_token_hash.eq(Some(token_hash)),
                        users::password_reset_expires_at.eq(Some(expires_at)),
                        users::updated_at.eq(Utc::now()),
                    ))
                    .execute(&mut conn)?;
                Some((user.id, user.email, token))
            }
            None => None,
        }
    };

    if let Some((user_id, address, token)) = target {
        let email = password_reset_email(
            &address,
            &state.config.password_reset_link(&token),
            state.config.password_reset_expiry_hours,
        );
        match state.mailer.send(email).await {
            Ok(()) => info!(user_id = %user_id, "password reset email sent"),
            Err(err) => warn!(user_id = %user_id, error = %err, "failed to send password reset email"),
        }
    }

    Ok(response)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: Option<String>,
    pub new_password: Option<String>,
}

pub async fn reset_password(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<ResetPasswordRequest>,
) -> AppResult<Json<Value>> {
    let (Some(token), Some(new_password)) =
        (non_blank(payload.token), non_blank(payload.new_password))
    else {
        return Err(AppError::bad_request("Token and new password are required."));
    };
    validate_new_password(&new_password)?;

    let token_hash = reset::hash_reset_token(token.trim());
    let now = Utc::now();
    let mut conn = state.db()?;

    let user_id: Uuid = users::table
        .filter(users::password_reset_token_hash.eq(&token_hash))
        .filter(users::password_reset_expires_at.gt(now))
        .select(users::id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::bad_request(INVALID_RESET_TOKEN))?;

    let password_hash = password::hash_password(&new_password)?;
    let updated = diesel::update(
        users::table
            .find(user_id)
            .filter(users::password_reset_token_hash.eq(&token_hash)),
    )
    .set((
        users::password_hash.eq(password_hash),
        users::password_reset_token_hash.eq(None::<String>),
        users::password_reset_expires_at.eq(None::<chrono::DateTime<Utc>>),
        users::updated_at.eq(now),
    ))
    .execute(&mut conn)?;

    if updated == 0 {
        return Err(AppError::bad_request(INVALID_RESET_TOKEN));
    }

    info!(user_id = %user_id, "password reset completed");
    Ok(Json(json!({ "message": "Password has been reset." })))
}
