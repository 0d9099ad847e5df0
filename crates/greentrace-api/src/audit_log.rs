//! Postgres sink for the access log.
//!
//! Entries are sealed in memory by [`greentrace_core::AccessLogger`] and
//! handed to this sink, which writes them on a spawned task so the request
//! path never waits on the insert.

use greentrace_core::{AccessLogEntry, AuditError, AuditSink};
use sqlx::PgPool;

/// Writes sealed access log entries to the `access_log` table.
#[derive(Debug, Clone)]
pub struct DbAuditSink {
    pool: PgPool,
}

impl DbAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl AuditSink for DbAuditSink {
    fn persist(&self, entry: &AccessLogEntry) -> Result<(), AuditError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| AuditError::Sink(format!("no async runtime: {e}")))?;
        let pool = self.pool.clone();
        let entry = entry.clone();
        handle.spawn(async move {
            if let Err(e) = crate::db::access_log::insert(&pool, &entry).await {
                tracing::warn!(
                    sequence = entry.sequence,
                    entry_hash = %entry.entry_hash,
                    error = %e,
                    "failed to persist access log entry"
                );
            }
        });
        Ok(())
    }
}
