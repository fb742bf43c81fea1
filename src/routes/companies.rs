use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{Company, NewCompany};
use crate::schema::companies;
use crate::state::AppState;
use crate::utils::json::JsonBody;
use crate::types::Role;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyResponse {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub created_at: DateTime<Utc>,
}

impl From<Company> for CompanyResponse {
    fn from(company: Company) -> Self {
        Self {
            id: company.id,
            name: company.name,
            address: company.address,
            created_at: company.created_at,
        }
    }
}

#[derive(Deserialize)]
pub struct CompanyRequest {
    pub name: String,
    pub address: String,
}

impl CompanyRequest {
    fn validated(&self) -> AppResult<(String, String)> {
        let name = self.name.trim();
        let address = self.address.trim();
        if name.is_empty() || address.is_empty() {
            return Err(AppError::bad_request("Name and address are required."));
        }
        Ok((name.to_owned(), address.to_owned()))
    }
}

pub async fn get_current_company(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
) -> AppResult<Json<CompanyResponse>> {
    let mut conn = state.db()?;
    let company: Company = companies::table
        .find(caller.company_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::not_found_with("Company not found."))?;
    Ok(Json(company.into()))
}

/// Registers another tenant. The caller stays in their own company.
pub async fn create_company(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    JsonBody(payload): JsonBody<CompanyRequest>,
) -> AppResult<(StatusCode, Json<CompanyResponse>)> {
    caller.require_role(&[Role::Admin])?;
    let (name, address) = payload.validated()?;

    let mut conn = state.db()?;
    let company = diesel::insert_into(companies::table)
        .values(&NewCompany {
            id: Uuid::new_v4(),
            name,
            address,
        })
        .get_result::<Company>(&mut conn)?;
    tracing::info!(company_id = %company.id, created_by = %caller.user_id, "company created");
    Ok((StatusCode::CREATED, Json(company.into())))
}

pub async fn update_current_company(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    JsonBody(payload): JsonBody<CompanyRequest>,
) -> AppResult<Json<CompanyResponse>> {
    caller.require_role(&[Role::Admin])?;
    let (name, address) = payload.validated()?;

    let mut conn = state.db()?;
    let company = diesel::update(companies::table.find(caller.company_id))
        .set((
            companies::name.eq(name),
            companies::address.eq(address),
            companies::updated_at.eq(Utc::now()),
        ))
        .get_result::<Company>(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::not_found_with("Company not found."))?;
    Ok(Json(company.into()))
}
