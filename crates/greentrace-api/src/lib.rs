//! # greentrace-api — Axum API Service
//!
//! HTTP surface for GreenTrace: product registration with role-based field
//! visibility, the carbon credit lifecycle, wallet-linked profiles, and the
//! write-once access log.
//!
//! ## Routes
//!
//! - `/api/products/*` — products, filtered per caller by the resolver
//! - `/api/credits/*` — carbon credit issuance and lifecycle
//! - `/api/auth/*` — wallet check-in, profile edits, role assignment
//! - `/api/audit/*` — access log reads (admin)
//! - `/openapi.json` — generated OpenAPI document
//! - `/health/*` — liveness and readiness checks (unauthenticated)
//!
//! ## Middleware Stack (outermost first)
//!
//! Cors → Trace → Metrics → Auth (bearer) → Viewer (wallet header) → Handler
//!
//! ## Crate Policy
//!
//! - Visibility and lifecycle rules live in `greentrace-core` and
//!   `greentrace-state`; handlers orchestrate, persist, and log.
//! - All errors map to structured HTTP responses via `AppError`.

pub mod audit_log;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod state;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, Method};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};

pub use error::AppError;
pub use state::AppState;

use crate::auth::{AuthConfig, WALLET_HEADER};

/// Build the application router.
pub fn app(state: AppState) -> Router {
    let auth_config = AuthConfig {
        token: state.config.auth_token.clone(),
    };

    let api = Router::new()
        .merge(routes::products::router())
        .merge(routes::credits::router())
        .merge(routes::profiles::router())
        .merge(routes::audit::router())
        .merge(openapi::router())
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(from_fn_with_state(state.clone(), auth::viewer_middleware))
        .layer(from_fn(auth::auth_middleware))
        .layer(from_fn(middleware::metrics::metrics_middleware))
        .layer(middleware::tracing_layer::layer())
        .layer(axum::Extension(auth_config))
        .layer(axum::Extension(state.metrics.clone()))
        .with_state(state.clone());

    let unauthenticated = routes::health::router().with_state(state.clone());

    let router = Router::new().merge(unauthenticated).merge(api);

    match cors_layer(&state) {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

/// CORS for the configured origins, or `None` when none are configured.
fn cors_layer(state: &AppState) -> Option<CorsLayer> {
    if state.config.cors_origins.is_empty() {
        return None;
    }
    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(state.config.cors_origins.clone()))
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([
                header::CONTENT_TYPE,
                header::AUTHORIZATION,
                HeaderName::from_static(WALLET_HEADER),
            ]),
    )
}
