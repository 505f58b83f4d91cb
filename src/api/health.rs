//! Liveness probe

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::api::middleware::AppState;
use crate::config::DatabaseDriver;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub driver: DatabaseDriver,
    pub version: &'static str,
}

/// GET /api/v1/health - 200 when the database answers, 503 otherwise
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (status, database) = match state.pool.ping().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            tracing::warn!("health check failed: {:#}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    };

    (
        status,
        Json(HealthResponse {
            status: if status == StatusCode::OK { "ok" } else { "degraded" },
            database,
            driver: state.pool.driver(),
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}
