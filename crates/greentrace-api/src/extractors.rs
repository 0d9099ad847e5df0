//! # Request Body Extraction & Validation
//!
//! Provides the [`Validate`] trait for request DTOs, helpers that map
//! JSON rejections and rule violations to [`AppError`], and the
//! [`ClientContext`] extractor that feeds the access log.

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use axum::Json;

use greentrace_core::ClientInfo;

use crate::error::AppError;

/// Header set by a fronting proxy; its first hop is the originating client.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Business rules a request DTO checks beyond what serde enforces.
pub trait Validate {
    /// Returns an error message on failure.
    fn validate(&self) -> Result<(), String>;
}

/// Extract a JSON body, mapping deserialization errors to [`AppError::BadRequest`].
pub fn extract_json<T>(result: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    result
        .map(|Json(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

/// Extract a JSON body and validate it using the [`Validate`] trait.
pub fn extract_validated_json<T: Validate>(
    result: Result<Json<T>, JsonRejection>,
) -> Result<T, AppError> {
    let value = extract_json(result)?;
    value.validate().map_err(AppError::Validation)?;
    Ok(value)
}

/// Fail with `"{field} is required"` when `value` is absent or blank.
pub fn require_present(value: Option<&str>, field: &str) -> Result<(), String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(()),
        _ => Err(format!("{field} is required")),
    }
}

/// Client address and user agent of the current request.
///
/// Never rejects: a request with no usable origin yields empty fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientContext(pub ClientInfo);

impl ClientContext {
    pub fn info(&self) -> ClientInfo {
        self.0.clone()
    }
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ClientContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Ok(Self(client_info(&parts.headers, peer)))
    }
}

/// Resolve the client from `X-Forwarded-For` (first valid hop), falling
/// back to the socket peer.
pub fn client_info(headers: &HeaderMap, peer: Option<IpAddr>) -> ClientInfo {
    let forwarded = headers
        .get(FORWARDED_FOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|hop| hop.trim().parse::<IpAddr>().ok());
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    ClientInfo::new(forwarded.or(peer).map(|ip| ip.to_string()), user_agent)
}
