//! # OpenAPI Document Assembly
//!
//! Collects the utoipa-documented handlers into one document served at
//! `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::state::AppState;

/// Registers the optional shared bearer secret.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .description(Some(
                            "Shared secret, required on /api routes when AUTH_TOKEN is set.",
                        ))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "GreenTrace API",
        description = "Supply-chain traceability with role-based field visibility, carbon credit lifecycle, and a write-once access log."
    ),
    paths(
        crate::routes::products::create_product,
        crate::routes::products::list_products,
        crate::routes::products::get_product,
        crate::routes::products::update_product,
        crate::routes::products::delete_product,
        crate::routes::products::product_privacy,
        crate::routes::credits::create_credit,
        crate::routes::credits::list_credits,
        crate::routes::credits::get_credit,
        crate::routes::credits::transfer_credit,
        crate::routes::credits::retire_credit,
        crate::routes::credits::verify_credit,
        crate::routes::profiles::auth_check,
        crate::routes::profiles::update_profile,
        crate::routes::profiles::change_role,
        crate::routes::audit::list_access,
        crate::routes::audit::verify_chain,
        crate::routes::health::health,
        crate::routes::health::liveness,
        crate::routes::health::readiness,
    ),
    components(schemas(
        crate::error::ErrorBody,
        crate::middleware::metrics::MetricsSnapshot,
        crate::routes::products::CreateProductRequest,
        crate::routes::products::ProductCreatedResponse,
        crate::routes::products::PrivacySummary,
        crate::routes::credits::CreateCreditRequest,
        crate::routes::credits::CreditCreatedResponse,
        crate::routes::credits::TransferRequest,
        crate::routes::credits::RetireRequest,
        crate::routes::credits::VerifyRequest,
        crate::routes::profiles::AuthCheckRequest,
        crate::routes::profiles::RoleChangeRequest,
        crate::routes::audit::ChainReport,
        crate::routes::health::HealthResponse,
        crate::routes::health::ReadinessResponse,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "products", description = "Product registration and role-filtered retrieval"),
        (name = "credits", description = "Carbon credit issuance, transfer, retirement, verification"),
        (name = "auth", description = "Wallet check-in and profile management"),
        (name = "audit", description = "Access log and hash-chain verification"),
        (name = "health", description = "Liveness and readiness checks"),
    )
)]
pub struct ApiDoc;

/// Serves the document at `/openapi.json`.
pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/products/create",
            "/api/products/{id}",
            "/api/credits/{id}/transfer",
            "/api/auth/check",
            "/api/audit/verify",
            "/health/readiness",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }

    #[test]
    fn bearer_scheme_registered() {
        let doc = ApiDoc::openapi();
        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }
}
