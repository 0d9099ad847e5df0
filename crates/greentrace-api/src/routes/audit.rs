//! # Access Log API
//!
//! Admin-only reads of the access log. These reads are not themselves
//! logged.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use greentrace_core::{AccessLogEntry, ChainIntegrity, EntityKind};

use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::state::AppState;

/// Filters for the access log listing.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AccessQuery {
    /// `product`, `carbon_credit`, or `user_profile`.
    pub entity_kind: Option<String>,
    /// Restrict to one record. Requires `entity_kind`.
    pub entity_id: Option<Uuid>,
    /// Maximum entries returned, newest first (default 100, max 1000).
    pub limit: Option<usize>,
}

impl AccessQuery {
    const DEFAULT_LIMIT: usize = 100;
    const MAX_LIMIT: usize = 1000;

    fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT).min(Self::MAX_LIMIT)
    }
}

#[derive(Debug, Serialize)]
pub struct AccessLogResponse {
    pub total: usize,
    pub entries: Vec<AccessLogEntry>,
}

/// Chain integrity report.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChainReport {
    pub total_entries: usize,
    pub broken_links: usize,
    pub chain_valid: bool,
    pub first_broken_sequence: Option<i64>,
}

impl From<ChainIntegrity> for ChainReport {
    fn from(c: ChainIntegrity) -> Self {
        Self {
            total_entries: c.total_entries,
            broken_links: c.broken_links,
            chain_valid: c.chain_valid,
            first_broken_sequence: c.first_broken_sequence,
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/audit/access", get(list_access))
        .route("/api/audit/verify", get(verify_chain))
}

/// GET /api/audit/access — Access log entries, newest first.
#[utoipa::path(
    get,
    path = "/api/audit/access",
    params(AccessQuery),
    responses(
        (status = 200, description = "Access log entries", body = serde_json::Value),
        (status = 400, description = "Unknown entity kind", body = crate::error::ErrorBody),
        (status = 403, description = "Admin role required", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "audit"
)]
async fn list_access(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(query): Query<AccessQuery>,
) -> Result<Json<AccessLogResponse>, AppError> {
    caller.require_admin()?;

    let mut entries = match query.entity_kind.as_deref() {
        Some(kind) => {
            let kind: EntityKind = kind
                .parse()
                .map_err(|e: greentrace_core::AuditError| AppError::Validation(e.to_string()))?;
            state.access_log.entries_for(kind, query.entity_id)
        }
        None if query.entity_id.is_some() => {
            return Err(AppError::Validation(
                "entity_id requires entity_kind".into(),
            ));
        }
        None => state.access_log.entries(),
    };

    let total = entries.len();
    entries.reverse();
    entries.truncate(query.effective_limit());
    Ok(Json(AccessLogResponse { total, entries }))
}

/// GET /api/audit/verify — Recompute the access log hash chain.
#[utoipa::path(
    get,
    path = "/api/audit/verify",
    responses(
        (status = 200, description = "Chain integrity", body = ChainReport),
        (status = 403, description = "Admin role required", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "audit"
)]
async fn verify_chain(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<ChainReport>, AppError> {
    caller.require_admin()?;
    let report = ChainReport::from(state.access_log.verify_chain());
    if !report.chain_valid {
        tracing::error!(
            broken_links = report.broken_links,
            first_broken_sequence = ?report.first_broken_sequence,
            "access log hash chain verification failed"
        );
    }
    Ok(Json(report))
}
