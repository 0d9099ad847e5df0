//! Carbon credit persistence. Operates on the `carbon_credits` table.
//!
//! Lifecycle transitions commit through [`update_if`], which only matches
//! while the row still holds the status pair the transition started from.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use greentrace_state::{CarbonCredit, CreditStatus, CreditTransitionRecord, VerificationStatus};

use super::decode_column;

fn transitions_json(credit: &CarbonCredit) -> Result<serde_json::Value, sqlx::Error> {
    serde_json::to_value(&credit.transitions)
        .map_err(|e| sqlx::Error::Protocol(format!("failed to serialize credit transitions: {e}")))
}

pub async fn insert(pool: &PgPool, credit: &CarbonCredit) -> Result<(), sqlx::Error> {
    let transitions = transitions_json(credit)?;

    sqlx::query(
        "INSERT INTO carbon_credits (id, amount, unit, issuer, recipient, status,
         verification_status, description, carbon_offset, blockchain_hash, blockchain_network,
         created_by, created_at, updated_at, transferred_at, retired_at, reason, transitions)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
    )
    .bind(credit.id)
    .bind(credit.amount)
    .bind(&credit.unit)
    .bind(credit.issuer.as_str())
    .bind(credit.recipient.as_str())
    .bind(credit.status.as_str())
    .bind(credit.verification_status.as_str())
    .bind(&credit.description)
    .bind(&credit.carbon_offset)
    .bind(&credit.blockchain_hash)
    .bind(&credit.blockchain_network)
    .bind(credit.created_by)
    .bind(credit.created_at)
    .bind(credit.updated_at)
    .bind(credit.transferred_at)
    .bind(credit.retired_at)
    .bind(&credit.reason)
    .bind(&transitions)
    .execute(pool)
    .await?;

    Ok(())
}

/// Write the post-transition credit only if the stored row still holds
/// `expected_status` and `expected_verification`.
///
/// Returns `false` when another writer committed first.
pub async fn update_if(
    pool: &PgPool,
    credit: &CarbonCredit,
    expected_status: CreditStatus,
    expected_verification: VerificationStatus,
) -> Result<bool, sqlx::Error> {
    let transitions = transitions_json(credit)?;

    let result = sqlx::query(
        "UPDATE carbon_credits SET recipient = $1, status = $2, verification_status = $3,
         updated_at = $4, transferred_at = $5, retired_at = $6, reason = $7, transitions = $8
         WHERE id = $9 AND status = $10 AND verification_status = $11",
    )
    .bind(credit.recipient.as_str())
    .bind(credit.status.as_str())
    .bind(credit.verification_status.as_str())
    .bind(credit.updated_at)
    .bind(credit.transferred_at)
    .bind(credit.retired_at)
    .bind(&credit.reason)
    .bind(&transitions)
    .bind(credit.id)
    .bind(expected_status.as_str())
    .bind(expected_verification.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn load_all(pool: &PgPool) -> Result<Vec<CarbonCredit>, sqlx::Error> {
    let rows = sqlx::query_as::<_, CreditRow>(
        "SELECT id, amount, unit, issuer, recipient, status, verification_status, description,
         carbon_offset, blockchain_hash, blockchain_network, created_by, created_at, updated_at,
         transferred_at, retired_at, reason, transitions
         FROM carbon_credits ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().filter_map(CreditRow::into_record).collect())
}

#[derive(sqlx::FromRow)]
struct CreditRow {
    id: Uuid,
    amount: Decimal,
    unit: String,
    issuer: String,
    recipient: String,
    status: String,
    verification_status: String,
    description: String,
    carbon_offset: String,
    blockchain_hash: String,
    blockchain_network: String,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    transferred_at: Option<DateTime<Utc>>,
    retired_at: Option<DateTime<Utc>>,
    reason: String,
    transitions: serde_json::Value,
}

impl CreditRow {
    fn into_record(self) -> Option<CarbonCredit> {
        const TABLE: &str = "carbon_credits";
        let issuer = decode_column(TABLE, self.id, "issuer", &self.issuer)?;
        let recipient = decode_column(TABLE, self.id, "recipient", &self.recipient)?;
        let status = decode_column(TABLE, self.id, "status", &self.status)?;
        let verification_status =
            decode_column(TABLE, self.id, "verification_status", &self.verification_status)?;

        let transitions: Vec<CreditTransitionRecord> = serde_json::from_value(self.transitions)
            .unwrap_or_else(|e| {
                tracing::error!(
                    id = %self.id,
                    error = %e,
                    "failed to deserialize credit transitions, using empty history"
                );
                Vec::new()
            });

        Some(CarbonCredit {
            id: self.id,
            amount: self.amount,
            unit: self.unit,
            issuer,
            recipient,
            status,
            verification_status,
            description: self.description,
            carbon_offset: self.carbon_offset,
            blockchain_hash: self.blockchain_hash,
            blockchain_network: self.blockchain_network,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
            transferred_at: self.transferred_at,
            retired_at: self.retired_at,
            reason: self.reason,
            transitions,
        })
    }
}
