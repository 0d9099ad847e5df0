//! # Middleware Modules
//!
//! Tower layers wrapped around the `/api` router.

pub mod metrics;
pub mod tracing_layer;
