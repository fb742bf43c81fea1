pub mod jwt;
pub mod password;
pub mod reset;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use diesel::prelude::*;

use crate::{error::AppError, schema::users, state::AppState, types::Role};

const INVALID_TOKEN: &str = "Invalid or expired token.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    pub company_id: Uuid,
}

impl AuthenticatedUser {
    /// Role allow-list check run at the top of gated handlers.
    pub fn require_role(&self, allowed: &[Role]) -> Result<(), AppError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(AppError::forbidden())
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>() {
            return Ok(user.clone());
        }

        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized())?;

        let claims = state
            .jwt
            .verify_token(bearer.token())
            .map_err(|_| AppError::unauthorized_with(INVALID_TOKEN))?;

        // Role and company come from the current row, so deleted or demoted
        // accounts lose access before their token expires.
        let (email, role, company_id) = {
            let mut conn = state.db()?;
            users::table
                .find(claims.id)
                .select((users::email, users::role, users::company_id))
                .first::<(String, String, Uuid)>(&mut conn)
                .optional()?
                .ok_or_else(|| AppError::unauthorized_with(INVALID_TOKEN))?
        };
        let role = role
            .parse::<Role>()
            .map_err(|_| AppError::unauthorized_with(INVALID_TOKEN))?;

        let user = AuthenticatedUser {
            user_id: claims.id,
            email,
            role,
            company_id,
        };
        parts.extensions.insert(user.clone());
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(role: Role) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: Uuid::new_v4(),
            email: "someone@example.com".to_string(),
            role,
            company_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn allow_list_admits_listed_roles_only() {
        let allowed = [Role::Admin, Role::Collaborateur];
        assert!(caller(Role::Admin).require_role(&allowed).is_ok());
        assert!(caller(Role::Collaborateur).require_role(&allowed).is_ok());

        let err = caller(Role::User).require_role(&allowed).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::FORBIDDEN);
        assert_eq!(err.message(), "Access denied.");
    }
}
