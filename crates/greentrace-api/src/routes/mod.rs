//! # API Route Modules
//!
//! - `products` — product registration and role-filtered retrieval.
//! - `credits` — carbon credit issuance and lifecycle transitions.
//! - `profiles` — wallet check-in, profile edits, role assignment.
//! - `audit` — admin reads of the access log and its hash chain.
//! - `health` — unauthenticated liveness and readiness checks.

pub mod audit;
pub mod credits;
pub mod health;
pub mod products;
pub mod profiles;
