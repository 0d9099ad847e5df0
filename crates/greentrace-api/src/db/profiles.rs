//! Profile persistence. Operates on the `user_profiles` table.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use greentrace_core::{Role, UserProfile, WalletAddress};

use super::decode_column;

pub async fn insert(pool: &PgPool, profile: &UserProfile) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO user_profiles (id, wallet_address, role, organization, position, phone,
         address, privacy_level, blockchain_network, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(profile.id)
    .bind(profile.wallet_address.as_str())
    .bind(profile.role.as_str())
    .bind(&profile.organization)
    .bind(&profile.position)
    .bind(&profile.phone)
    .bind(&profile.address)
    .bind(profile.privacy_level.as_str())
    .bind(&profile.blockchain_network)
    .bind(profile.created_at)
    .bind(profile.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Overwrite the mutable columns of a profile, provided the stored
/// `updated_at` is still `expected_updated_at`.
pub async fn update_if(
    pool: &PgPool,
    profile: &UserProfile,
    expected_updated_at: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE user_profiles SET role = $1, organization = $2, position = $3, phone = $4,
         address = $5, privacy_level = $6, updated_at = $7 WHERE id = $8 AND updated_at = $9",
    )
    .bind(profile.role.as_str())
    .bind(&profile.organization)
    .bind(&profile.position)
    .bind(&profile.phone)
    .bind(&profile.address)
    .bind(profile.privacy_level.as_str())
    .bind(profile.updated_at)
    .bind(profile.id)
    .bind(expected_updated_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn load_all(pool: &PgPool) -> Result<Vec<UserProfile>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ProfileRow>(
        "SELECT id, wallet_address, role, organization, position, phone, address,
         privacy_level, blockchain_network, created_at, updated_at
         FROM user_profiles ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().filter_map(ProfileRow::into_record).collect())
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    id: Uuid,
    wallet_address: String,
    role: String,
    organization: String,
    position: String,
    phone: String,
    address: String,
    privacy_level: String,
    blockchain_network: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ProfileRow {
    fn into_record(self) -> Option<UserProfile> {
        let wallet_address: WalletAddress =
            decode_column("user_profiles", self.id, "wallet_address", &self.wallet_address)?;
        let role: Role = decode_column("user_profiles", self.id, "role", &self.role)?;
        let privacy_level: Role =
            decode_column("user_profiles", self.id, "privacy_level", &self.privacy_level)?;
        Some(UserProfile {
            id: self.id,
            wallet_address,
            role,
            organization: self.organization,
            position: self.position,
            phone: self.phone,
            address: self.address,
            privacy_level,
            blockchain_network: self.blockchain_network,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
