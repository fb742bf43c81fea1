use axum::{extract::State, http::StatusCode, response::Json};
use diesel::prelude::*;
use serde_json::{json, Value};
use tracing::warn;

use crate::state::AppState;

/// Liveness plus a `SELECT 1` against the pool.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let database = match state.db() {
        Ok(mut conn) => diesel::sql_query("SELECT 1").execute(&mut conn).is_ok(),
        Err(err) => {
            warn!(error = %err, "health check could not reach the database");
            false
        }
    };

    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if database { "ok" } else { "degraded" },
            "database": database,
        })),
    )
}
