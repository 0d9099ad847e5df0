//! # Access Log
//!
//! Write-once compliance trail of every disclosure and mutation.
//!
//! Each [`AccessLogEntry`] carries the SHA-256 hash of the previous entry, and
//! its own hash covers its content plus that link. Altering or removing any
//! entry breaks the chain at that point, which [`AuditTrail::verify_chain`]
//! reports.
//!
//! The [`AccessLogger`] appends in memory synchronously and then hands each
//! entry to its [`AuditSink`]s. Sink failures are logged and dropped: a
//! request never fails because its access could not be persisted.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::clock;
use crate::role::Role;
use crate::visibility::Viewer;

/// Previous-hash value of the first entry in a chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// What the viewer did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessAction {
    View,
    List,
    Create,
    Update,
    Delete,
    Transfer,
    Retire,
    Verify,
}

impl AccessAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::List => "list",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Transfer => "transfer",
            Self::Retire => "retire",
            Self::Verify => "verify",
        }
    }
}

impl std::str::FromStr for AccessAction {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| AuditError::Decode(format!("unknown access action: {s}")))
    }
}

impl std::fmt::Display for AccessAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of record accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Product,
    CarbonCredit,
    UserProfile,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::CarbonCredit => "carbon_credit",
            Self::UserProfile => "user_profile",
        }
    }
}

impl std::str::FromStr for EntityKind {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| AuditError::Decode(format!("unknown entity kind: {s}")))
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from the access log.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuditError {
    /// A sink could not persist an entry.
    #[error("audit sink failed: {0}")]
    Sink(String),

    /// A stored entry could not be decoded.
    #[error("audit decode failed: {0}")]
    Decode(String),

    /// Persisted entries may only be loaded into an empty trail.
    #[error("access log already holds {0} entries; restore refused")]
    NotEmpty(usize),
}

/// Maximum stored length of a client's user agent string.
pub const MAX_USER_AGENT_LEN: usize = 512;

/// Where a request came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    pub fn new(ip_address: Option<String>, user_agent: Option<String>) -> Self {
        Self {
            ip_address,
            user_agent: user_agent
                .map(|ua| ua.trim().chars().take(MAX_USER_AGENT_LEN).collect::<String>())
                .filter(|ua| !ua.is_empty()),
        }
    }
}

// ── Entries ─────────────────────────────────────────────────────────────────

/// What to record. Chain fields are filled in by [`AuditTrail::append`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRecord {
    pub viewer_profile_id: Option<Uuid>,
    pub viewer_wallet: Option<String>,
    pub action: AccessAction,
    pub entity_kind: EntityKind,
    pub entity_id: Option<Uuid>,
    pub disclosed_fields: Vec<String>,
    pub privacy_level: Role,
    pub client: ClientInfo,
    /// Action-specific context, e.g. the recipient of a transfer.
    pub details: Option<Value>,
}

impl AccessRecord {
    pub fn new(
        viewer: &Viewer,
        action: AccessAction,
        entity_kind: EntityKind,
        entity_id: Option<Uuid>,
    ) -> Self {
        Self {
            viewer_profile_id: Some(viewer.profile_id),
            viewer_wallet: Some(viewer.wallet.as_str().to_string()),
            action,
            entity_kind,
            entity_id,
            disclosed_fields: Vec::new(),
            privacy_level: viewer.role,
            client: ClientInfo::default(),
            details: None,
        }
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disclosed_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_client(mut self, client: ClientInfo) -> Self {
        self.client = client;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// One immutable access log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub id: Uuid,
    pub sequence: i64,
    pub viewer_profile_id: Option<Uuid>,
    pub viewer_wallet: Option<String>,
    pub action: AccessAction,
    pub entity_kind: EntityKind,
    pub entity_id: Option<Uuid>,
    pub disclosed_fields: Vec<String>,
    pub privacy_level: Role,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub details: Option<Value>,
    pub recorded_at: DateTime<Utc>,
    pub previous_hash: String,
    pub entry_hash: String,
}

/// Hashed content of an entry. Field order is part of the hash format.
#[derive(Serialize)]
struct HashInput<'a> {
    id: &'a Uuid,
    sequence: i64,
    viewer_profile_id: &'a Option<Uuid>,
    viewer_wallet: &'a Option<String>,
    action: AccessAction,
    entity_kind: EntityKind,
    entity_id: &'a Option<Uuid>,
    disclosed_fields: &'a [String],
    privacy_level: Role,
    ip_address: &'a Option<String>,
    user_agent: &'a Option<String>,
    details: &'a Option<Value>,
    recorded_at: &'a DateTime<Utc>,
    previous_hash: &'a str,
}

impl AccessLogEntry {
    /// Recompute the SHA-256 hash of this entry's content and link.
    pub fn compute_hash(&self) -> String {
        let input = HashInput {
            id: &self.id,
            sequence: self.sequence,
            viewer_profile_id: &self.viewer_profile_id,
            viewer_wallet: &self.viewer_wallet,
            action: self.action,
            entity_kind: self.entity_kind,
            entity_id: &self.entity_id,
            disclosed_fields: &self.disclosed_fields,
            privacy_level: self.privacy_level,
            ip_address: &self.ip_address,
            user_agent: &self.user_agent,
            details: &self.details,
            recorded_at: &self.recorded_at,
            previous_hash: &self.previous_hash,
        };
        // Serializing plain data into a Vec cannot fail.
        let bytes = serde_json::to_vec(&input).unwrap_or_default();
        Sha256::digest(&bytes)
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

// ── Trail ───────────────────────────────────────────────────────────────────

/// Result of recomputing the hash chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainIntegrity {
    pub total_entries: usize,
    pub broken_links: usize,
    pub chain_valid: bool,
    /// Sequence number of the first entry that failed verification.
    pub first_broken_sequence: Option<i64>,
}

/// Append-only, hash-chained sequence of access log entries.
///
/// There is no API to modify or remove an entry once appended.
#[derive(Debug, Clone, Default)]
pub struct AuditTrail {
    entries: Vec<AccessLogEntry>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a trail from persisted entries, ordered by sequence.
    ///
    /// The entries are taken as stored; call [`verify_chain`](Self::verify_chain)
    /// to check them.
    pub fn restore(mut entries: Vec<AccessLogEntry>) -> Self {
        entries.sort_by_key(|e| e.sequence);
        Self { entries }
    }

    /// Append a record, returning the sealed entry.
    pub fn append(&mut self, record: AccessRecord) -> AccessLogEntry {
        let (sequence, previous_hash) = match self.entries.last() {
            Some(last) => (last.sequence + 1, last.entry_hash.clone()),
            None => (1, GENESIS_HASH.to_string()),
        };
        let mut entry = AccessLogEntry {
            id: Uuid::new_v4(),
            sequence,
            viewer_profile_id: record.viewer_profile_id,
            viewer_wallet: record.viewer_wallet,
            action: record.action,
            entity_kind: record.entity_kind,
            entity_id: record.entity_id,
            disclosed_fields: record.disclosed_fields,
            privacy_level: record.privacy_level,
            ip_address: record.client.ip_address,
            user_agent: record.client.user_agent,
            details: record.details,
            // Storage keeps microseconds; the hash must survive a round trip.
            recorded_at: clock::now(),
            previous_hash,
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.compute_hash();
        self.entries.push(entry.clone());
        entry
    }

    pub fn entries(&self) -> &[AccessLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries touching one entity kind, optionally one record of it.
    pub fn entries_for(&self, kind: EntityKind, id: Option<Uuid>) -> Vec<&AccessLogEntry> {
        self.entries
            .iter()
            .filter(|e| e.entity_kind == kind && (id.is_none() || e.entity_id == id))
            .collect()
    }

    /// Recompute every hash and link.
    pub fn verify_chain(&self) -> ChainIntegrity {
        let mut broken_links = 0;
        let mut first_broken_sequence = None;
        let mut expected_prev: &str = GENESIS_HASH;

        for entry in &self.entries {
            let link_ok = entry.previous_hash == expected_prev;
            let hash_ok = entry.compute_hash() == entry.entry_hash;
            if !(link_ok && hash_ok) {
                broken_links += 1;
                first_broken_sequence.get_or_insert(entry.sequence);
            }
            expected_prev = entry.entry_hash.as_str();
        }

        ChainIntegrity {
            total_entries: self.entries.len(),
            broken_links,
            chain_valid: broken_links == 0,
            first_broken_sequence,
        }
    }
}

// ── Logger ──────────────────────────────────────────────────────────────────

/// Durable destination for sealed entries.
pub trait AuditSink: Send + Sync {
    /// Persist one entry. Must not block on I/O; long-running work belongs
    /// on a spawned task.
    fn persist(&self, entry: &AccessLogEntry) -> Result<(), AuditError>;
}

/// Shared access logger: in-memory trail plus optional durable sinks.
#[derive(Clone, Default)]
pub struct AccessLogger {
    trail: Arc<RwLock<AuditTrail>>,
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl std::fmt::Debug for AccessLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessLogger")
            .field("entries", &self.trail.read().len())
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl AccessLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a durable sink.
    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Load previously persisted entries into an empty trail.
    ///
    /// Once anything has been recorded the trail can only grow, so a
    /// restore over existing entries is refused.
    pub fn restore(&self, entries: Vec<AccessLogEntry>) -> Result<(), AuditError> {
        let mut trail = self.trail.write();
        if !trail.is_empty() {
            return Err(AuditError::NotEmpty(trail.len()));
        }
        *trail = AuditTrail::restore(entries);
        Ok(())
    }

    /// Append one entry. Never fails; sink errors are logged and dropped.
    pub fn record(&self, record: AccessRecord) -> AccessLogEntry {
        let entry = self.trail.write().append(record);
        tracing::debug!(
            sequence = entry.sequence,
            action = %entry.action,
            entity = %entry.entity_kind,
            entity_id = ?entry.entity_id,
            "access recorded"
        );
        for sink in &self.sinks {
            if let Err(e) = sink.persist(&entry) {
                tracing::warn!(sequence = entry.sequence, error = %e, "access log persistence failed");
            }
        }
        entry
    }

    /// Snapshot of every entry.
    pub fn entries(&self) -> Vec<AccessLogEntry> {
        self.trail.read().entries().to_vec()
    }

    /// Snapshot of entries touching one entity kind, optionally one record.
    pub fn entries_for(&self, kind: EntityKind, id: Option<Uuid>) -> Vec<AccessLogEntry> {
        self.trail
            .read()
            .entries_for(kind, id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.trail.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.trail.read().is_empty()
    }

    pub fn verify_chain(&self) -> ChainIntegrity {
        self.trail.read().verify_chain()
    }
}
