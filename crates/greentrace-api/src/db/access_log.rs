//! Access log persistence. Operates on the append-only `access_log` table.
//!
//! A trigger rejects `UPDATE` and `DELETE`, so the only write path is
//! [`insert`]. Hashes are computed in `greentrace-core` before the row
//! reaches the database.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use greentrace_core::{AccessLogEntry, Role};

use super::decode_column;

pub async fn insert(pool: &PgPool, entry: &AccessLogEntry) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO access_log (id, sequence, viewer_profile_id, viewer_wallet, action,
         entity_kind, entity_id, disclosed_fields, privacy_level, ip_address, user_agent,
         details, recorded_at, previous_hash, entry_hash)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
    )
    .bind(entry.id)
    .bind(entry.sequence)
    .bind(entry.viewer_profile_id)
    .bind(&entry.viewer_wallet)
    .bind(entry.action.as_str())
    .bind(entry.entity_kind.as_str())
    .bind(entry.entity_id)
    .bind(&entry.disclosed_fields)
    .bind(entry.privacy_level.as_str())
    .bind(&entry.ip_address)
    .bind(&entry.user_agent)
    .bind(&entry.details)
    .bind(entry.recorded_at)
    .bind(&entry.previous_hash)
    .bind(&entry.entry_hash)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load the whole log in sequence order.
pub async fn load_all(pool: &PgPool) -> Result<Vec<AccessLogEntry>, sqlx::Error> {
    let rows = sqlx::query_as::<_, AccessLogRow>(
        "SELECT id, sequence, viewer_profile_id, viewer_wallet, action, entity_kind, entity_id,
         disclosed_fields, privacy_level, ip_address, user_agent, details, recorded_at,
         previous_hash, entry_hash
         FROM access_log ORDER BY sequence",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().filter_map(AccessLogRow::into_record).collect())
}

#[derive(sqlx::FromRow)]
struct AccessLogRow {
    id: Uuid,
    sequence: i64,
    viewer_profile_id: Option<Uuid>,
    viewer_wallet: Option<String>,
    action: String,
    entity_kind: String,
    entity_id: Option<Uuid>,
    disclosed_fields: Vec<String>,
    privacy_level: String,
    ip_address: Option<String>,
    user_agent: Option<String>,
    details: Option<Value>,
    recorded_at: DateTime<Utc>,
    previous_hash: String,
    entry_hash: String,
}

impl AccessLogRow {
    fn into_record(self) -> Option<AccessLogEntry> {
        const TABLE: &str = "access_log";
        let action = decode_column(TABLE, self.id, "action", &self.action)?;
        let entity_kind = decode_column(TABLE, self.id, "entity_kind", &self.entity_kind)?;
        let privacy_level: Role =
            decode_column(TABLE, self.id, "privacy_level", &self.privacy_level)?;
        Some(AccessLogEntry {
            id: self.id,
            sequence: self.sequence,
            viewer_profile_id: self.viewer_profile_id,
            viewer_wallet: self.viewer_wallet,
            action,
            entity_kind,
            entity_id: self.entity_id,
            disclosed_fields: self.disclosed_fields,
            privacy_level,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            details: self.details,
            recorded_at: self.recorded_at,
            previous_hash: self.previous_hash,
            entry_hash: self.entry_hash,
        })
    }
}
