//! # Product API
//!
//! Product registration and retrieval. Every read goes through the
//! visibility resolver; listings additionally apply the all-flags-public
//! filter for non-admin callers.
//!
//! Writes persist first and then commit in memory, both conditional on the
//! `updated_at` the request started from. A lost race is a 409.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use greentrace_core::{
    list_visible, resolve, visibility, AccessAction, AccessRecord, Certification, EntityKind,
    FieldGroup, GroupFlags, NewProduct, Product, ProductPatch, ProductView, Viewer, WalletAddress,
};

use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::extractors::{
    extract_json, extract_validated_json, require_present, ClientContext, Validate,
};
use crate::state::AppState;

/// Request to register a product.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateProductRequest {
    /// Wallet of the registering account. Provisioned on first use.
    pub wallet_address: Option<String>,
    pub name: Option<String>,
    pub batch_id: Option<String>,
    /// One of the certification names; blank means `none`.
    #[serde(default)]
    pub certification: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub producer: String,
    #[serde(default)]
    pub iot_data: String,
    #[serde(default)]
    pub carbon_activity: String,
    pub is_sensitive_data_public: Option<bool>,
    pub is_producer_details_public: Option<bool>,
    pub is_iot_data_public: Option<bool>,
    pub is_carbon_details_public: Option<bool>,
    #[serde(default)]
    pub blockchain_hash: String,
    pub blockchain_network: Option<String>,
}

impl Validate for CreateProductRequest {
    fn validate(&self) -> Result<(), String> {
        require_present(self.wallet_address.as_deref(), "wallet_address")?;
        require_present(self.name.as_deref(), "name")?;
        require_present(self.batch_id.as_deref(), "batch_id")?;
        Ok(())
    }
}

impl CreateProductRequest {
    fn flags(&self) -> GroupFlags {
        let default = GroupFlags::all_public();
        GroupFlags {
            sensitive: self.is_sensitive_data_public.unwrap_or(default.sensitive),
            producer: self.is_producer_details_public.unwrap_or(default.producer),
            iot: self.is_iot_data_public.unwrap_or(default.iot),
            carbon: self.is_carbon_details_public.unwrap_or(default.carbon),
        }
    }
}

/// Response to a successful registration.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProductCreatedResponse {
    pub success: bool,
    pub product_id: Uuid,
    pub message: String,
}

/// Products visible to the caller.
#[derive(Debug, Serialize)]
pub struct ProductListResponse {
    pub count: usize,
    pub products: Vec<ProductView>,
}

/// Override flags of one product and what they mean for the caller.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PrivacySummary {
    pub product_id: Uuid,
    #[schema(value_type = Object)]
    pub flags: GroupFlags,
    /// Groups the caller receives on a single fetch.
    #[schema(value_type = Vec<String>)]
    pub disclosed_groups: Vec<FieldGroup>,
    /// Whether the product appears in non-admin listings.
    pub fully_public: bool,
}

/// Build the products router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/products", get(list_products))
        .route("/api/products/create", post(create_product))
        .route(
            "/api/products/:id",
            get(get_product).put(update_product).delete(delete_product),
        )
        .route("/api/products/:id/privacy", get(product_privacy))
}

/// Fail with 403 unless `viewer` created the product or is an admin.
fn require_owner(product: &Product, viewer: &Viewer) -> Result<(), AppError> {
    if viewer.is_privileged() || product.created_by == viewer.profile_id {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "only the product owner or an admin may modify this product".into(),
        ))
    }
}

fn modified_concurrently(id: &Uuid) -> AppError {
    AppError::Conflict(format!("product {id} was modified concurrently"))
}

fn persistence_error(err: sqlx::Error, what: &str) -> AppError {
    if crate::db::products::is_unique_violation(&err) {
        return AppError::Conflict("batch_id already exists".into());
    }
    tracing::error!(error = %err, "failed to persist {what}");
    AppError::Internal(format!("{what} could not be persisted"))
}

/// POST /api/products/create — Register a product.
#[utoipa::path(
    post,
    path = "/api/products/create",
    request_body = CreateProductRequest,
    responses(
        (status = 201, description = "Product registered", body = ProductCreatedResponse),
        (status = 400, description = "Missing or invalid field", body = crate::error::ErrorBody),
        (status = 409, description = "Duplicate batch id", body = crate::error::ErrorBody),
    ),
    tag = "products"
)]
async fn create_product(
    State(state): State<AppState>,
    client: ClientContext,
    body: Result<Json<CreateProductRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ProductCreatedResponse>), AppError> {
    let req = extract_validated_json(body)?;
    let wallet = WalletAddress::parse(req.wallet_address.as_deref().unwrap_or_default())?;
    let certification = Certification::parse(&req.certification)?;
    let flags = req.flags();

    let (profile, _) = state
        .provision_profile(&wallet, req.blockchain_network.as_deref())
        .await?;
    let viewer = Viewer::from_profile(&profile);

    let product = Product::create(
        NewProduct {
            name: req.name.unwrap_or_default(),
            batch_id: req.batch_id.unwrap_or_default(),
            certification,
            location: req.location,
            description: req.description,
            producer: req.producer,
            iot_data: req.iot_data,
            carbon_activity: req.carbon_activity,
            flags,
            blockchain_hash: req.blockchain_hash,
            blockchain_network: req.blockchain_network,
        },
        profile.id,
    )?;

    if state.products.batch_taken(&product.batch_id) {
        return Err(AppError::Conflict(format!(
            "batch_id '{}' already exists",
            product.batch_id
        )));
    }
    if let Some(pool) = &state.db_pool {
        crate::db::products::insert(pool, &product)
            .await
            .map_err(|e| persistence_error(e, "product"))?;
    }
    state.products.insert(product.clone())?;

    tracing::info!(product_id = %product.id, batch_id = %product.batch_id, "product registered");
    state.access_log.record(
        AccessRecord::new(&viewer, AccessAction::Create, EntityKind::Product, Some(product.id))
            .with_client(client.info())
            .with_details(json!({ "batch_id": product.batch_id, "name": product.name })),
    );

    Ok((
        StatusCode::CREATED,
        Json(ProductCreatedResponse {
            success: true,
            product_id: product.id,
            message: format!("Product '{}' registered", product.name),
        }),
    ))
}

/// GET /api/products — List products visible to the caller.
#[utoipa::path(
    get,
    path = "/api/products",
    responses(
        (status = 200, description = "Visible products, resolved for the caller", body = serde_json::Value),
        (status = 401, description = "No known wallet", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "products"
)]
async fn list_products(
    State(state): State<AppState>,
    client: ClientContext,
    caller: CallerIdentity,
) -> Json<ProductListResponse> {
    let viewer = caller.viewer();
    let mut listed: Vec<Product> = state
        .products
        .list()
        .into_iter()
        .filter(|p| list_visible(p, viewer))
        .collect();
    listed.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let products: Vec<ProductView> = listed
        .iter()
        .map(|p| resolve(p, viewer, &state.registry))
        .collect();

    let mut fields: Vec<String> = products.iter().flat_map(|v| v.disclosed_fields()).collect();
    fields.sort();
    fields.dedup();
    state.access_log.record(
        AccessRecord::new(viewer, AccessAction::List, EntityKind::Product, None)
            .with_fields(fields)
            .with_client(client.info()),
    );

    Json(ProductListResponse {
        count: products.len(),
        products,
    })
}

/// GET /api/products/{id} — Fetch one product, filtered for the caller.
#[utoipa::path(
    get,
    path = "/api/products/{id}",
    params(("id" = Uuid, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Product resolved for the caller", body = serde_json::Value),
        (status = 401, description = "No known wallet", body = crate::error::ErrorBody),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "products"
)]
async fn get_product(
    State(state): State<AppState>,
    client: ClientContext,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<ProductView>, AppError> {
    let product = state
        .products
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("product {id} not found")))?;
    let view = resolve(&product, caller.viewer(), &state.registry);

    state.access_log.record(
        AccessRecord::new(caller.viewer(), AccessAction::View, EntityKind::Product, Some(id))
            .with_fields(view.disclosed_fields())
            .with_client(client.info()),
    );
    Ok(Json(view))
}

/// PUT /api/products/{id} — Update fields or override flags.
#[utoipa::path(
    put,
    path = "/api/products/{id}",
    params(("id" = Uuid, Path, description = "Product ID")),
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Updated product resolved for the caller", body = serde_json::Value),
        (status = 403, description = "Not the owner", body = crate::error::ErrorBody),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "Duplicate batch id or concurrent modification", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "products"
)]
async fn update_product(
    State(state): State<AppState>,
    client: ClientContext,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<ProductPatch>, JsonRejection>,
) -> Result<Json<ProductView>, AppError> {
    let patch = extract_json(body)?;
    let viewer = caller.viewer();

    let (previous, product, changed) = state.products.stage_update(&id, |p| {
        require_owner(p, viewer)?;
        p.apply(patch).map_err(AppError::from)
    })?;

    if !changed.is_empty() {
        if let Some(pool) = &state.db_pool {
            let matched = crate::db::products::update_if(pool, &product, previous.updated_at)
                .await
                .map_err(|e| persistence_error(e, "product update"))?;
            if !matched {
                return Err(modified_concurrently(&id));
            }
        }
        state.products.commit_update(&previous, product.clone())?;
        tracing::info!(product_id = %id, changed = ?changed, "product updated");
    }

    state.access_log.record(
        AccessRecord::new(viewer, AccessAction::Update, EntityKind::Product, Some(id))
            .with_fields(changed.iter().copied())
            .with_client(client.info())
            .with_details(json!({ "changed": changed })),
    );
    Ok(Json(resolve(&product, viewer, &state.registry)))
}

/// DELETE /api/products/{id} — Remove a product.
#[utoipa::path(
    delete,
    path = "/api/products/{id}",
    params(("id" = Uuid, Path, description = "Product ID")),
    responses(
        (status = 204, description = "Product deleted"),
        (status = 403, description = "Not the owner", body = crate::error::ErrorBody),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "Concurrent modification", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "products"
)]
async fn delete_product(
    State(state): State<AppState>,
    client: ClientContext,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let viewer = caller.viewer();
    let product = state
        .products
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("product {id} not found")))?;
    require_owner(&product, viewer)?;

    if let Some(pool) = &state.db_pool {
        let matched = crate::db::products::delete_if(pool, id, product.updated_at)
            .await
            .map_err(|e| persistence_error(e, "product deletion"))?;
        if !matched {
            return Err(modified_concurrently(&id));
        }
    }
    state.products.remove_if_unchanged(&product)?;

    tracing::info!(product_id = %id, "product deleted");
    state.access_log.record(
        AccessRecord::new(viewer, AccessAction::Delete, EntityKind::Product, Some(id))
            .with_client(client.info())
            .with_details(json!({ "batch_id": product.batch_id, "name": product.name })),
    );
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/products/{id}/privacy — Override flag summary.
#[utoipa::path(
    get,
    path = "/api/products/{id}/privacy",
    params(("id" = Uuid, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Privacy summary", body = PrivacySummary),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "products"
)]
async fn product_privacy(
    State(state): State<AppState>,
    client: ClientContext,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<PrivacySummary>, AppError> {
    let product = state
        .products
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("product {id} not found")))?;
    let groups = visibility::disclosed_groups(&product, caller.viewer(), &state.registry);

    state.access_log.record(
        AccessRecord::new(caller.viewer(), AccessAction::View, EntityKind::Product, Some(id))
            .with_client(client.info()),
    );
    Ok(Json(PrivacySummary {
        product_id: id,
        flags: product.flags,
        disclosed_groups: groups.groups(),
        fully_public: product.flags.is_fully_public(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: serde_json::Value) -> CreateProductRequest {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn create_request_requires_wallet_name_and_batch() {
        let err = request(serde_json::json!({"name": "Tea", "batch_id": "B"}))
            .validate()
            .unwrap_err();
        assert_eq!(err, "wallet_address is required");
        let err = request(serde_json::json!({"wallet_address": "0x1", "batch_id": "B"}))
            .validate()
            .unwrap_err();
        assert_eq!(err, "name is required");
        assert!(request(serde_json::json!({"wallet_address": "0x1", "name": "Tea", "batch_id": "B"}))
            .validate()
            .is_ok());
    }

    #[test]
    fn omitted_flags_default_to_public() {
        let req = request(serde_json::json!({
            "wallet_address": "0x1",
            "name": "Tea",
            "batch_id": "B",
            "is_producer_details_public": false,
        }));
        let flags = req.flags();
        assert!(flags.sensitive && flags.iot && flags.carbon);
        assert!(!flags.producer);
    }
}
