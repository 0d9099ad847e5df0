//! # Health Checks
//!
//! Unauthenticated liveness and readiness endpoints for orchestrators.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::middleware::metrics::MetricsSnapshot;
use crate::state::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReadinessResponse {
    pub status: String,
    pub database: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health/", get(health))
        .route("/health/liveness", get(liveness))
        .route("/health/readiness", get(readiness))
}

/// GET /health/ — Service identity and request counters.
#[utoipa::path(
    get,
    path = "/health/",
    responses((status = 200, description = "Service is up", body = HealthResponse)),
    tag = "health"
)]
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        service: "greentrace-api".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        metrics: state.metrics.snapshot(),
    })
}

/// GET /health/liveness — Process is running.
#[utoipa::path(
    get,
    path = "/health/liveness",
    responses((status = 200, description = "Alive", body = String)),
    tag = "health"
)]
async fn liveness() -> &'static str {
    "ok"
}

/// GET /health/readiness — Ready to serve; checks the database when configured.
#[utoipa::path(
    get,
    path = "/health/readiness",
    responses(
        (status = 200, description = "Ready", body = ReadinessResponse),
        (status = 503, description = "Database unreachable", body = ReadinessResponse),
    ),
    tag = "health"
)]
async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let Some(pool) = &state.db_pool else {
        return (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready".into(),
                database: "not configured".into(),
            }),
        );
    };

    match sqlx::query("SELECT 1").execute(pool).await {
        Ok(_) => (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready".into(),
                database: "connected".into(),
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse {
                    status: "not ready".into(),
                    database: "unreachable".into(),
                }),
            )
        }
    }
}
