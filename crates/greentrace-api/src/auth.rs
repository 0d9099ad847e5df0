//! # Authentication & Caller Resolution
//!
//! Two layers run in front of every `/api` route:
//!
//! 1. [`auth_middleware`] checks the optional shared bearer secret
//!    (`Authorization: Bearer <token>`) in constant time.
//! 2. [`viewer_middleware`] reads the `X-Wallet-Address` header and, when
//!    it names a known profile, injects a [`CallerIdentity`] into the
//!    request extensions.
//!
//! Handlers that read records take a [`CallerIdentity`] argument; the
//! extractor rejects with 401 when no profile was resolved.

use axum::extract::{Request, State};
use axum::http::header;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;

use greentrace_core::{Viewer, WalletAddress};

use crate::error::AppError;
use crate::state::AppState;

/// Header carrying the caller's wallet address.
pub const WALLET_HEADER: &str = "x-wallet-address";

// ── Secrets ─────────────────────────────────────────────────────────────────

/// A bearer secret. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretToken(String);

impl SecretToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretToken([REDACTED])")
    }
}

/// Auth configuration injected into request extensions.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub token: Option<SecretToken>,
}

/// Constant-time comparison of bearer tokens.
fn constant_time_token_eq(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    if provided.len() != expected.len() {
        // Keep timing independent of which side is shorter.
        let _ = expected.ct_eq(expected);
        return false;
    }
    provided.ct_eq(expected).into()
}

/// Reject requests without the configured bearer secret. No-op when unset.
pub async fn auth_middleware(request: Request, next: Next) -> Response {
    let expected = request
        .extensions()
        .get::<AuthConfig>()
        .and_then(|c| c.token.clone());

    let Some(expected) = expected else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match provided {
        Some(value) => match value.strip_prefix("Bearer ") {
            Some(token) if constant_time_token_eq(token, expected.expose()) => {
                next.run(request).await
            }
            Some(_) => {
                tracing::warn!("authentication failed: invalid bearer token");
                AppError::Unauthorized("invalid bearer token".into()).into_response()
            }
            None => {
                tracing::warn!("authentication failed: non-Bearer authorization scheme");
                AppError::Unauthorized("authorization header must use Bearer scheme".into())
                    .into_response()
            }
        },
        None => {
            tracing::warn!("authentication failed: missing authorization header");
            AppError::Unauthorized("missing authorization header".into()).into_response()
        }
    }
}

// ── Caller identity ─────────────────────────────────────────────────────────

/// The resolved caller of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity(pub Viewer);

impl CallerIdentity {
    pub fn viewer(&self) -> &Viewer {
        &self.0
    }

    /// Fail with 403 unless the caller is an admin.
    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.0.is_privileged() {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "role 'admin' required, caller has '{}'",
                self.0.role
            )))
        }
    }
}

#[axum::async_trait]
impl<S: Send + Sync> axum::extract::FromRequestParts<S> for CallerIdentity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CallerIdentity>()
            .cloned()
            .ok_or_else(|| {
                AppError::Unauthorized(
                    "a known wallet address is required in the X-Wallet-Address header".into(),
                )
            })
    }
}

/// Resolve `X-Wallet-Address` to a profile and attach the caller identity.
///
/// Missing, malformed, or unknown wallets leave the request anonymous.
pub async fn viewer_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let raw = request
        .headers()
        .get(WALLET_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    if let Some(raw) = raw {
        match WalletAddress::parse(&raw) {
            Ok(wallet) => match state.profiles.find_by_wallet(&wallet) {
                Some(profile) => {
                    request
                        .extensions_mut()
                        .insert(CallerIdentity(Viewer::from_profile(&profile)));
                }
                None => tracing::debug!(wallet = %wallet, "wallet header names no profile"),
            },
            Err(e) => tracing::debug!(error = %e, "ignoring malformed wallet header"),
        }
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::middleware::{from_fn, from_fn_with_state};
    use axum::routing::get;
    use axum::Router;
    use greentrace_core::{Role, UserProfile};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn bearer_app(token: Option<&str>) -> Router {
        let auth_config = AuthConfig {
            token: token.map(SecretToken::new),
        };
        Router::new()
            .route("/test", get(|| async { "ok" }))
            .layer(from_fn(auth_middleware))
            .layer(axum::Extension(auth_config))
    }

    async fn whoami(caller: CallerIdentity) -> String {
        format!("{}:{}", caller.0.wallet, caller.0.role)
    }

    fn viewer_app(state: AppState) -> Router {
        Router::new()
            .route("/whoami", get(whoami))
            .layer(from_fn_with_state(state.clone(), viewer_middleware))
            .with_state(state)
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn valid_bearer_token_accepted() {
        let response = bearer_app(Some("my-secret"))
            .oneshot(
                Request::builder()
                    .uri("/test")
                    .header("Authorization", "Bearer my-secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_authorization_header_rejected() {
        let response = bearer_app(Some("my-secret"))
            .oneshot(Request::builder().uri("/test").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn wrong_token_rejected() {
        let response = bearer_app(Some("my-secret"))
            .oneshot(
                Request::builder()
                    .uri("/test")
                    .header("Authorization", "Bearer my-secreT")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn non_bearer_scheme_rejected() {
        let response = bearer_app(Some("my-secret"))
            .oneshot(
                Request::builder()
                    .uri("/test")
                    .header("Authorization", "Basic dXNlcjpwYXNz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(body_text(response).await.contains("Bearer scheme"));
    }

    #[tokio::test]
    async fn auth_disabled_allows_all_requests() {
        let response = bearer_app(None)
            .oneshot(Request::builder().uri("/test").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn constant_time_eq_behaviour() {
        assert!(constant_time_token_eq("abc", "abc"));
        assert!(!constant_time_token_eq("abc", "abd"));
        assert!(!constant_time_token_eq("abc", "abcd"));
    }

    #[test]
    fn secret_token_debug_redacted() {
        let token = SecretToken::new("hunter2");
        assert!(!format!("{token:?}").contains("hunter2"));
    }

    #[tokio::test]
    async fn known_wallet_resolves_caller() {
        let state = AppState::new();
        let wallet = WalletAddress::parse("0xCAFE").unwrap();
        state
            .profiles
            .publish(UserProfile::provision(wallet.clone(), Role::Enterprise, None).unwrap());

        let response = viewer_app(state)
            .oneshot(
                Request::builder()
                    .uri("/whoami")
                    .header(WALLET_HEADER, "0xcafe")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "0xcafe:enterprise");
    }

    #[tokio::test]
    async fn unknown_wallet_is_unauthorized() {
        let response = viewer_app(AppState::new())
            .oneshot(
                Request::builder()
                    .uri("/whoami")
                    .header(WALLET_HEADER, "0xnobody")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn missing_wallet_header_is_unauthorized() {
        let response = viewer_app(AppState::new())
            .oneshot(Request::builder().uri("/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn require_admin() {
        let viewer = |role| {
            CallerIdentity(Viewer {
                profile_id: uuid::Uuid::new_v4(),
                wallet: WalletAddress::parse("0x1").unwrap(),
                role,
            })
        };
        assert!(viewer(Role::Admin).require_admin().is_ok());
        assert!(matches!(
            viewer(Role::Enterprise).require_admin(),
            Err(AppError::Forbidden(_))
        ));
    }
}
