//! # Profile API
//!
//! Wallet check-in (lazy profile provisioning), contact-detail updates,
//! and admin role assignment.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use greentrace_core::{
    AccessAction, AccessRecord, EntityKind, ProfileUpdate, Role, UserProfile, Viewer,
    WalletAddress,
};

use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::extractors::{
    extract_json, extract_validated_json, require_present, ClientContext, Validate,
};
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct AuthCheckRequest {
    pub wallet_address: Option<String>,
    /// Ledger network recorded on a newly provisioned profile.
    pub network: Option<String>,
}

impl Validate for AuthCheckRequest {
    fn validate(&self) -> Result<(), String> {
        require_present(self.wallet_address.as_deref(), "wallet_address")
    }
}

/// Profile plus whether this call provisioned it.
#[derive(Debug, Serialize)]
pub struct AuthCheckResponse {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub created: bool,
}

#[derive(Debug, Deserialize)]
pub struct ProfileUpdateRequest {
    pub wallet_address: Option<String>,
    #[serde(flatten)]
    pub update: ProfileUpdate,
}

impl Validate for ProfileUpdateRequest {
    fn validate(&self) -> Result<(), String> {
        require_present(self.wallet_address.as_deref(), "wallet_address")
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleChangeRequest {
    #[schema(value_type = String, example = "enterprise")]
    pub role: Role,
}

/// Build the profiles router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/check", post(auth_check))
        .route("/api/auth/update", post(update_profile))
        .route("/api/auth/profiles/:id/role", put(change_role))
}

/// Persist a staged change, then commit it in memory. Both steps only
/// apply while the stored profile is still `previous`.
async fn commit_profile(
    state: &AppState,
    previous: &UserProfile,
    profile: &UserProfile,
) -> Result<(), AppError> {
    if let Some(pool) = &state.db_pool {
        let matched = crate::db::profiles::update_if(pool, profile, previous.updated_at)
            .await
            .map_err(|e| {
                tracing::error!(profile_id = %profile.id, error = %e, "failed to persist profile update");
                AppError::Internal("profile update could not be persisted".into())
            })?;
        if !matched {
            return Err(AppError::Conflict(format!(
                "profile {} was modified concurrently",
                profile.id
            )));
        }
    }
    state.profiles.commit_update(previous, profile.clone())
}

/// POST /api/auth/check — Return the wallet's profile, creating it on first use.
#[utoipa::path(
    post,
    path = "/api/auth/check",
    request_body = AuthCheckRequest,
    responses(
        (status = 200, description = "Profile with `created` flag", body = serde_json::Value),
        (status = 400, description = "Missing or malformed wallet", body = crate::error::ErrorBody),
    ),
    tag = "auth"
)]
async fn auth_check(
    State(state): State<AppState>,
    client: ClientContext,
    body: Result<Json<AuthCheckRequest>, JsonRejection>,
) -> Result<Json<AuthCheckResponse>, AppError> {
    let req = extract_validated_json(body)?;
    let wallet = WalletAddress::parse(req.wallet_address.as_deref().unwrap_or_default())?;

    let (profile, created) = state.provision_profile(&wallet, req.network.as_deref()).await?;

    let action = if created {
        AccessAction::Create
    } else {
        AccessAction::View
    };
    let mut record = AccessRecord::new(
        &Viewer::from_profile(&profile),
        action,
        EntityKind::UserProfile,
        Some(profile.id),
    )
    .with_client(client.info());
    if created {
        record = record.with_details(json!({ "network": profile.blockchain_network }));
    }
    state.access_log.record(record);
    Ok(Json(AuthCheckResponse { profile, created }))
}

/// POST /api/auth/update — Update contact details of an existing profile.
#[utoipa::path(
    post,
    path = "/api/auth/update",
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Updated profile", body = serde_json::Value),
        (status = 401, description = "No known wallet", body = crate::error::ErrorBody),
        (status = 403, description = "Caller may not edit this profile", body = crate::error::ErrorBody),
        (status = 404, description = "Unknown wallet", body = crate::error::ErrorBody),
        (status = 409, description = "Concurrent modification", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
async fn update_profile(
    State(state): State<AppState>,
    client: ClientContext,
    caller: CallerIdentity,
    body: Result<Json<ProfileUpdateRequest>, JsonRejection>,
) -> Result<Json<UserProfile>, AppError> {
    let req = extract_validated_json(body)?;
    let wallet = WalletAddress::parse(req.wallet_address.as_deref().unwrap_or_default())?;
    let viewer = caller.viewer();

    if viewer.wallet != wallet && !viewer.is_privileged() {
        return Err(AppError::Forbidden(
            "profiles may only be edited by their owner or an admin".into(),
        ));
    }

    let current = state
        .profiles
        .find_by_wallet(&wallet)
        .ok_or_else(|| AppError::NotFound(format!("no profile for wallet {wallet}")))?;

    let (previous, profile, changed) = state
        .profiles
        .stage_update(&current.id, |p| p.apply(req.update).map_err(AppError::from))?;

    if !changed.is_empty() {
        commit_profile(&state, &previous, &profile).await?;
        tracing::info!(profile_id = %profile.id, changed = ?changed, "profile updated");
    }

    state.access_log.record(
        AccessRecord::new(viewer, AccessAction::Update, EntityKind::UserProfile, Some(profile.id))
            .with_fields(changed.iter().copied())
            .with_client(client.info()),
    );
    Ok(Json(profile))
}

/// PUT /api/auth/profiles/{id}/role — Assign a role (admin only).
#[utoipa::path(
    put,
    path = "/api/auth/profiles/{id}/role",
    params(("id" = Uuid, Path, description = "Profile ID")),
    request_body = RoleChangeRequest,
    responses(
        (status = 200, description = "Updated profile", body = serde_json::Value),
        (status = 403, description = "Admin role required", body = crate::error::ErrorBody),
        (status = 404, description = "Unknown profile", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
async fn change_role(
    State(state): State<AppState>,
    client: ClientContext,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<RoleChangeRequest>, JsonRejection>,
) -> Result<Json<UserProfile>, AppError> {
    caller.require_admin()?;
    let req = extract_json(body)?;

    let (previous, profile, ()) = state.profiles.stage_update(&id, |p| {
        p.set_role(req.role);
        Ok(())
    })?;

    if previous.role != profile.role {
        commit_profile(&state, &previous, &profile).await?;
        tracing::info!(
            profile_id = %id,
            from = %previous.role,
            to = %profile.role,
            by = %caller.viewer().wallet,
            "role changed"
        );
    }

    state.access_log.record(
        AccessRecord::new(caller.viewer(), AccessAction::Update, EntityKind::UserProfile, Some(id))
            .with_fields(["role"])
            .with_client(client.info())
            .with_details(json!({ "from": previous.role, "to": profile.role })),
    );
    Ok(Json(profile))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_request_flattens_contact_fields() {
        let req: ProfileUpdateRequest = serde_json::from_value(serde_json::json!({
            "wallet_address": "0xabc",
            "organization": "Acme Coffee",
            "privacy_level": "enterprise",
        }))
        .unwrap();
        assert_eq!(req.update.organization.as_deref(), Some("Acme Coffee"));
        assert_eq!(req.update.privacy_level, Some(Role::Enterprise));
        assert!(req.update.phone.is_none());
    }

    #[test]
    fn auth_check_requires_wallet() {
        let req: AuthCheckRequest = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(req.validate().unwrap_err(), "wallet_address is required");
    }

    #[test]
    fn response_flattens_profile() {
        let wallet = WalletAddress::parse("0xabc").unwrap();
        let profile = UserProfile::provision(wallet, Role::Public, None).unwrap();
        let json = serde_json::to_value(AuthCheckResponse {
            profile,
            created: true,
        })
        .unwrap();
        assert_eq!(json["wallet_address"], "0xabc");
        assert_eq!(json["role"], "public");
        assert_eq!(json["created"], true);
    }
}
