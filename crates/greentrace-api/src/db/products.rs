//! Product persistence. Operates on the `products` table.
//!
//! `batch_id` carries a unique index; a violation surfaces as a
//! `sqlx::Error::Database` the caller maps to 409. Updates and deletes
//! only match while the row still carries the `updated_at` the caller read.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use greentrace_core::{Certification, GroupFlags, Product};

const COLUMNS: &str = "id, name, batch_id, certification, location, description, producer,
    iot_data, carbon_activity, is_sensitive_data_public, is_producer_details_public,
    is_iot_data_public, is_carbon_details_public, blockchain_hash, blockchain_network,
    created_by, created_at, updated_at";

pub async fn insert(pool: &PgPool, product: &Product) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO products (id, name, batch_id, certification, location, description, producer,
         iot_data, carbon_activity, is_sensitive_data_public, is_producer_details_public,
         is_iot_data_public, is_carbon_details_public, blockchain_hash, blockchain_network,
         created_by, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
    )
    .bind(product.id)
    .bind(&product.name)
    .bind(&product.batch_id)
    .bind(product.certification.as_str())
    .bind(&product.location)
    .bind(&product.description)
    .bind(&product.producer)
    .bind(&product.iot_data)
    .bind(&product.carbon_activity)
    .bind(product.flags.sensitive)
    .bind(product.flags.producer)
    .bind(product.flags.iot)
    .bind(product.flags.carbon)
    .bind(&product.blockchain_hash)
    .bind(&product.blockchain_network)
    .bind(product.created_by)
    .bind(product.created_at)
    .bind(product.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Overwrite every mutable column of a product whose stored `updated_at`
/// is still `expected_updated_at`. Returns `false` when no row matched.
pub async fn update_if(
    pool: &PgPool,
    product: &Product,
    expected_updated_at: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE products SET name = $1, batch_id = $2, certification = $3, location = $4,
         description = $5, producer = $6, iot_data = $7, carbon_activity = $8,
         is_sensitive_data_public = $9, is_producer_details_public = $10,
         is_iot_data_public = $11, is_carbon_details_public = $12, blockchain_hash = $13,
         updated_at = $14
         WHERE id = $15 AND updated_at = $16",
    )
    .bind(&product.name)
    .bind(&product.batch_id)
    .bind(product.certification.as_str())
    .bind(&product.location)
    .bind(&product.description)
    .bind(&product.producer)
    .bind(&product.iot_data)
    .bind(&product.carbon_activity)
    .bind(product.flags.sensitive)
    .bind(product.flags.producer)
    .bind(product.flags.iot)
    .bind(product.flags.carbon)
    .bind(&product.blockchain_hash)
    .bind(product.updated_at)
    .bind(product.id)
    .bind(expected_updated_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn delete_if(
    pool: &PgPool,
    id: Uuid,
    expected_updated_at: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM products WHERE id = $1 AND updated_at = $2")
        .bind(id)
        .bind(expected_updated_at)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn load_all(pool: &PgPool) -> Result<Vec<Product>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ProductRow>(&format!(
        "SELECT {COLUMNS} FROM products ORDER BY created_at"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().filter_map(ProductRow::into_record).collect())
}

/// Whether `err` is a unique-constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    batch_id: String,
    certification: String,
    location: String,
    description: String,
    producer: String,
    iot_data: String,
    carbon_activity: String,
    is_sensitive_data_public: bool,
    is_producer_details_public: bool,
    is_iot_data_public: bool,
    is_carbon_details_public: bool,
    blockchain_hash: String,
    blockchain_network: String,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ProductRow {
    fn into_record(self) -> Option<Product> {
        let certification = match Certification::parse(&self.certification) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(
                    id = %self.id,
                    certification = %self.certification,
                    error = %e,
                    "unknown certification in database, skipping row"
                );
                return None;
            }
        };
        Some(Product {
            id: self.id,
            name: self.name,
            batch_id: self.batch_id,
            certification,
            location: self.location,
            description: self.description,
            producer: self.producer,
            iot_data: self.iot_data,
            carbon_activity: self.carbon_activity,
            flags: GroupFlags {
                sensitive: self.is_sensitive_data_public,
                producer: self.is_producer_details_public,
                iot: self.is_iot_data_public,
                carbon: self.is_carbon_details_public,
            },
            blockchain_hash: self.blockchain_hash,
            blockchain_network: self.blockchain_network,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
