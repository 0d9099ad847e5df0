//! # Database Persistence Layer
//!
//! Optional Postgres persistence via SQLx. When a database URL is
//! configured every mutation is written through to Postgres and the
//! in-memory stores are hydrated from it at startup. Without one the
//! service runs in-memory only, which is what the test suite uses.
//!
//! Lifecycle rules are enforced in `greentrace-state`; SQL only guards
//! uniqueness, the conditional credit commit, and access-log immutability.

pub mod access_log;
pub mod credits;
pub mod products;
pub mod profiles;

use sqlx::postgres::{PgPool, PgPoolOptions};

/// Initialize the connection pool and run embedded migrations.
///
/// Returns `None` when no URL is given (in-memory-only mode).
pub async fn init_pool(url: Option<&str>) -> Result<Option<PgPool>, sqlx::Error> {
    let Some(url) = url.filter(|u| !u.trim().is_empty()) else {
        tracing::warn!("DATABASE_URL not set, running in-memory only. State will not survive restarts.");
        return Ok(None);
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(url)
        .await?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    Ok(Some(pool))
}

/// Decode a stored enum column, logging rows that no longer parse.
pub(crate) fn decode_column<T>(table: &str, id: uuid::Uuid, column: &str, raw: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw.parse() {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::error!(table, %id, column, value = raw, error = %e, "undecodable column in database, skipping row");
            None
        }
    }
}
