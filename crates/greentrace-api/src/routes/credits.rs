//! # Carbon Credit API
//!
//! Credit issuance, listing, and lifecycle transitions. Non-admin callers
//! only ever see verified credits.
//!
//! Transitions run on a snapshot, are written to Postgres conditionally on
//! the snapshot's status pair, then committed in memory only if the stored
//! credit still holds that pair. A lost race surfaces as 409.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use greentrace_core::{AccessAction, AccessRecord, EntityKind, Viewer, WalletAddress};
use greentrace_state::{CarbonCredit, CreditError, NewCredit, VerificationStatus};

use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::extractors::{
    extract_json, extract_validated_json, require_present, ClientContext, Validate,
};
use crate::state::AppState;

/// Request to issue a credit.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCreditRequest {
    /// Issuing wallet. Provisioned on first use.
    pub wallet_address: Option<String>,
    /// Positive decimal with at most two places.
    #[schema(value_type = Option<String>, example = "12.50")]
    pub amount: Option<Decimal>,
    /// Defaults to `tonnes`.
    pub unit: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub carbon_offset: String,
    #[serde(default)]
    pub blockchain_hash: String,
    pub blockchain_network: Option<String>,
}

impl Validate for CreateCreditRequest {
    fn validate(&self) -> Result<(), String> {
        require_present(self.wallet_address.as_deref(), "wallet_address")?;
        if self.amount.is_none() {
            return Err("amount is required".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreditCreatedResponse {
    pub success: bool,
    pub credit_id: Uuid,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct CreditListResponse {
    pub count: usize,
    pub credits: Vec<CarbonCredit>,
}

/// Request to transfer a credit. The amount must equal the credit's amount.
#[derive(Debug, Deserialize, ToSchema)]
pub struct TransferRequest {
    pub recipient: Option<String>,
    #[schema(value_type = Option<String>, example = "12.50")]
    pub amount: Option<Decimal>,
}

impl Validate for TransferRequest {
    fn validate(&self) -> Result<(), String> {
        require_present(self.recipient.as_deref(), "recipient")?;
        if self.amount.is_none() {
            return Err("amount is required".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RetireRequest {
    #[serde(default)]
    pub reason: String,
}

/// Admin verification decision.
#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyRequest {
    /// `verified` or `rejected`.
    #[schema(value_type = String, example = "verified")]
    pub decision: VerificationStatus,
    #[serde(default)]
    pub reason: String,
}

/// Build the credits router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/credits", get(list_credits))
        .route("/api/credits/create", post(create_credit))
        .route("/api/credits/:id", get(get_credit))
        .route("/api/credits/:id/transfer", post(transfer_credit))
        .route("/api/credits/:id/retire", post(retire_credit))
        .route("/api/credits/:id/verify", post(verify_credit))
}

/// Who may run a transition.
#[derive(Debug, Clone, Copy)]
enum Gate {
    /// Admin or the current holder.
    Holder,
    Admin,
}

fn not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("credit {id} not found"))
}

fn check_gate(gate: Gate, credit: &CarbonCredit, viewer: &Viewer) -> Result<(), AppError> {
    match gate {
        Gate::Admin => CallerIdentity(viewer.clone()).require_admin(),
        Gate::Holder if credit.manageable_by(viewer) => Ok(()),
        Gate::Holder if credit.visible_to(viewer) || credit.created_by == viewer.profile_id => {
            Err(AppError::Forbidden(
                "only the credit holder or an admin may manage this credit".into(),
            ))
        }
        Gate::Holder => Err(not_found(credit.id)),
    }
}

/// Run `apply` on a snapshot of credit `id` and commit it conditionally.
/// `audit` is recorded once the commit succeeds.
async fn commit_transition(
    state: &AppState,
    viewer: &Viewer,
    id: Uuid,
    gate: Gate,
    audit: AccessRecord,
    apply: impl FnOnce(&mut CarbonCredit) -> Result<(), CreditError>,
) -> Result<CarbonCredit, AppError> {
    let snapshot = state.credits.get(&id).ok_or_else(|| not_found(id))?;
    check_gate(gate, &snapshot, viewer)?;

    let mut next = snapshot.clone();
    apply(&mut next)?;

    let expected = (snapshot.status, snapshot.verification_status);
    if let Some(pool) = &state.db_pool {
        match crate::db::credits::update_if(pool, &next, expected.0, expected.1).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(credit_id = %id, "credit changed in database during transition");
                return Err(AppError::Conflict(format!(
                    "credit {id} was modified concurrently"
                )));
            }
            Err(e) => {
                tracing::error!(credit_id = %id, error = %e, "failed to persist credit transition");
                return Err(AppError::Internal("credit transition could not be persisted".into()));
            }
        }
    }

    let committed = next.clone();
    state
        .credits
        .try_update(&id, move |current| {
            if (current.status, current.verification_status) != expected {
                return Err(AppError::Conflict(format!(
                    "credit {id} was modified concurrently"
                )));
            }
            *current = next;
            Ok(())
        })
        .ok_or_else(|| not_found(id))??;

    tracing::info!(
        credit_id = %id,
        action = %audit.action,
        status = %committed.status,
        verification = %committed.verification_status,
        "credit transition committed"
    );
    state.access_log.record(audit);
    Ok(committed)
}

/// POST /api/credits/create — Issue a credit.
#[utoipa::path(
    post,
    path = "/api/credits/create",
    request_body = CreateCreditRequest,
    responses(
        (status = 201, description = "Credit issued", body = CreditCreatedResponse),
        (status = 400, description = "Missing wallet or amount", body = crate::error::ErrorBody),
        (status = 500, description = "Persistence failure", body = crate::error::ErrorBody),
    ),
    tag = "credits"
)]
async fn create_credit(
    State(state): State<AppState>,
    client: ClientContext,
    body: Result<Json<CreateCreditRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreditCreatedResponse>), AppError> {
    let req = extract_validated_json(body)?;
    let wallet = WalletAddress::parse(req.wallet_address.as_deref().unwrap_or_default())?;
    let amount = req
        .amount
        .ok_or_else(|| AppError::Validation("amount is required".into()))?;

    let (profile, _) = state
        .provision_profile(&wallet, req.blockchain_network.as_deref())
        .await?;
    let viewer = Viewer::from_profile(&profile);

    let network = req
        .blockchain_network
        .or_else(|| Some(state.config.default_network.clone()));
    let credit = CarbonCredit::issue(
        NewCredit {
            amount,
            unit: req.unit,
            description: req.description,
            carbon_offset: req.carbon_offset,
            blockchain_hash: req.blockchain_hash,
            blockchain_network: network,
        },
        &viewer,
    )?;

    if let Some(pool) = &state.db_pool {
        if let Err(e) = crate::db::credits::insert(pool, &credit).await {
            tracing::error!(credit_id = %credit.id, error = %e, "failed to persist credit");
            return Err(AppError::Internal("credit could not be persisted".into()));
        }
    }
    state.credits.insert(credit.id, credit.clone());

    tracing::info!(credit_id = %credit.id, amount = %credit.amount, unit = %credit.unit, "credit issued");
    state.access_log.record(
        AccessRecord::new(&viewer, AccessAction::Create, EntityKind::CarbonCredit, Some(credit.id))
            .with_client(client.info())
            .with_details(json!({ "amount": credit.amount.to_string(), "unit": credit.unit })),
    );

    Ok((
        StatusCode::CREATED,
        Json(CreditCreatedResponse {
            success: true,
            credit_id: credit.id,
            message: format!("Issued {} {} carbon credit", credit.amount, credit.unit),
        }),
    ))
}

/// GET /api/credits — List credits visible to the caller.
#[utoipa::path(
    get,
    path = "/api/credits",
    responses(
        (status = 200, description = "Visible credits", body = serde_json::Value),
        (status = 401, description = "No known wallet", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "credits"
)]
async fn list_credits(
    State(state): State<AppState>,
    client: ClientContext,
    caller: CallerIdentity,
) -> Json<CreditListResponse> {
    let viewer = caller.viewer();
    let mut credits: Vec<CarbonCredit> = state
        .credits
        .list()
        .into_iter()
        .filter(|c| c.visible_to(viewer))
        .collect();
    credits.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    state.access_log.record(
        AccessRecord::new(viewer, AccessAction::List, EntityKind::CarbonCredit, None)
            .with_client(client.info()),
    );
    Json(CreditListResponse {
        count: credits.len(),
        credits,
    })
}

/// GET /api/credits/{id} — Fetch one credit.
#[utoipa::path(
    get,
    path = "/api/credits/{id}",
    params(("id" = Uuid, Path, description = "Credit ID")),
    responses(
        (status = 200, description = "Credit found", body = serde_json::Value),
        (status = 404, description = "Not found or not visible", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "credits"
)]
async fn get_credit(
    State(state): State<AppState>,
    client: ClientContext,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<CarbonCredit>, AppError> {
    let credit = state
        .credits
        .get(&id)
        .filter(|c| c.visible_to(caller.viewer()))
        .ok_or_else(|| not_found(id))?;

    state.access_log.record(
        AccessRecord::new(caller.viewer(), AccessAction::View, EntityKind::CarbonCredit, Some(id))
            .with_client(client.info()),
    );
    Ok(Json(credit))
}

/// POST /api/credits/{id}/transfer — Transfer the whole credit.
#[utoipa::path(
    post,
    path = "/api/credits/{id}/transfer",
    params(("id" = Uuid, Path, description = "Credit ID")),
    request_body = TransferRequest,
    responses(
        (status = 200, description = "Credit transferred", body = serde_json::Value),
        (status = 400, description = "Missing recipient or amount mismatch", body = crate::error::ErrorBody),
        (status = 403, description = "Not the holder", body = crate::error::ErrorBody),
        (status = 409, description = "Credit not in issued state", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "credits"
)]
async fn transfer_credit(
    State(state): State<AppState>,
    client: ClientContext,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<TransferRequest>, JsonRejection>,
) -> Result<Json<CarbonCredit>, AppError> {
    let req = extract_validated_json(body)?;
    let recipient = WalletAddress::parse(req.recipient.as_deref().unwrap_or_default())?;
    let amount = req
        .amount
        .ok_or_else(|| AppError::Validation("amount is required".into()))?;
    let actor = caller.viewer().profile_id;
    let audit = AccessRecord::new(
        caller.viewer(),
        AccessAction::Transfer,
        EntityKind::CarbonCredit,
        Some(id),
    )
    .with_client(client.info())
    .with_details(json!({ "recipient": recipient.as_str(), "amount": amount.to_string() }));

    let credit = commit_transition(
        &state,
        caller.viewer(),
        id,
        Gate::Holder,
        audit,
        |c| c.transfer(recipient, amount, actor),
    )
    .await?;
    Ok(Json(credit))
}

/// POST /api/credits/{id}/retire — Retire the credit.
#[utoipa::path(
    post,
    path = "/api/credits/{id}/retire",
    params(("id" = Uuid, Path, description = "Credit ID")),
    request_body = RetireRequest,
    responses(
        (status = 200, description = "Credit retired", body = serde_json::Value),
        (status = 403, description = "Not the holder", body = crate::error::ErrorBody),
        (status = 409, description = "Credit already retired", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "credits"
)]
async fn retire_credit(
    State(state): State<AppState>,
    client: ClientContext,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<RetireRequest>, JsonRejection>,
) -> Result<Json<CarbonCredit>, AppError> {
    let req = extract_json(body)?;
    let actor = caller.viewer().profile_id;
    let audit = AccessRecord::new(
        caller.viewer(),
        AccessAction::Retire,
        EntityKind::CarbonCredit,
        Some(id),
    )
    .with_client(client.info())
    .with_details(json!({ "reason": req.reason }));

    let credit = commit_transition(
        &state,
        caller.viewer(),
        id,
        Gate::Holder,
        audit,
        |c| c.retire(req.reason, actor),
    )
    .await?;
    Ok(Json(credit))
}

/// POST /api/credits/{id}/verify — Record the verification decision.
#[utoipa::path(
    post,
    path = "/api/credits/{id}/verify",
    params(("id" = Uuid, Path, description = "Credit ID")),
    request_body = VerifyRequest,
    responses(
        (status = 200, description = "Decision recorded", body = serde_json::Value),
        (status = 403, description = "Admin role required", body = crate::error::ErrorBody),
        (status = 409, description = "Already decided", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "credits"
)]
async fn verify_credit(
    State(state): State<AppState>,
    client: ClientContext,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<Json<CarbonCredit>, AppError> {
    caller.require_admin()?;
    let req = extract_json(body)?;
    let actor = caller.viewer().profile_id;
    let audit = AccessRecord::new(
        caller.viewer(),
        AccessAction::Verify,
        EntityKind::CarbonCredit,
        Some(id),
    )
    .with_client(client.info())
    .with_details(json!({ "decision": req.decision, "reason": req.reason }));

    let credit = commit_transition(
        &state,
        caller.viewer(),
        id,
        Gate::Admin,
        audit,
        |c| c.decide(req.decision, actor, req.reason),
    )
    .await?;
    Ok(Json(credit))
}
