//! Health check endpoint for service monitoring.

use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::AppError;
use crate::state::AppState;

/// Health check response with database connectivity.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,

    pub database: String,

    pub timestamp: DateTime<Utc>,
}

/// Health check handler.
///
/// Executes a trivial query so load balancers notice a dead database, not
/// just a live process.
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, AppError> {
    sqlx::query("SELECT 1").execute(&state.pool).await?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        database: "connected".to_string(),
        timestamp: Utc::now(),
    }))
}
