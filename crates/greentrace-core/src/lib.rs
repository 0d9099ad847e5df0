//! # greentrace-core — Foundational Types for GreenTrace
//!
//! The leaf crate of the workspace. It owns the access-control policy that
//! decides which attributes of a supply-chain record a caller may see, and
//! the write-once trail that records every disclosure.
//!
//! ## Modules
//!
//! - [`role`] — the four user roles, the field groups they gate, and the
//!   [`RoleRegistry`] table mapping each role to its default capability set.
//! - [`product`] — the `Product` record: an always-public core plus four
//!   optional field groups, each with a per-record override flag.
//! - [`profile`] — the wallet-linked `UserProfile`.
//! - [`visibility`] — the resolver (record × viewer → disclosed fields) and
//!   the stricter all-or-nothing list filter.
//! - [`audit`] — access log entries, the hash-chained [`AuditTrail`], and
//!   the failure-isolating [`AccessLogger`].
//! - [`clock`] — storage-precision timestamps and monotonic `updated_at`.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `greentrace-*` crates.
//! - No network or database I/O. Persistence lives in `greentrace-api`.
//! - No `.unwrap()` outside tests.

pub mod audit;
pub mod clock;
pub mod error;
pub mod identity;
pub mod product;
pub mod profile;
pub mod role;
pub mod visibility;

pub use audit::{
    AccessAction, AccessLogEntry, AccessLogger, AccessRecord, AuditError, AuditSink, AuditTrail,
    ChainIntegrity, ClientInfo, EntityKind,
};
pub use error::CoreError;
pub use identity::WalletAddress;
pub use product::{Certification, GroupFlags, NewProduct, Product, ProductPatch};
pub use profile::{ProfileUpdate, UserProfile, DEFAULT_NETWORK};
pub use role::{CapabilitySet, FieldGroup, RegistryError, Role, RoleRegistry};
pub use visibility::{list_visible, resolve, ProductView, Viewer};
