use async_trait::async_trait;
use sqlx::{PgExecutor, PgPool};

use sunset_application::AuditRepository;
use sunset_core::{AppError, AppResult};
use sunset_domain::{AuditEntry, BatchId};

/// PostgreSQL-backed append-only audit repository.
///
/// Entries go straight to the pool, so a failure entry commits even while the
/// dataset transaction it describes was rolled back.
#[derive(Clone)]
pub struct PostgresAuditRepository {
    pool: PgPool,
}

impl PostgresAuditRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditRepository for PostgresAuditRepository {
    async fn append_entry(&self, entry: AuditEntry) -> AppResult<()> {
        insert_audit_entry(&self.pool, &entry).await
    }
}

/// Inserts one audit entry through any executor, pool or open transaction.
pub(crate) async fn insert_audit_entry<'e, E>(executor: E, entry: &AuditEntry) -> AppResult<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO retirement_audit_entries (
            batch_id,
            dataset_name,
            message,
            error_info,
            actor_id,
            created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(entry.batch_id.map(BatchId::value))
    .bind(entry.dataset_name.as_str())
    .bind(entry.message.as_str())
    .bind(entry.error_info.as_deref())
    .bind(entry.actor_id.as_str())
    .bind(entry.recorded_at)
    .execute(executor)
    .await
    .map_err(|error| {
        AppError::Internal(format!(
            "failed to append audit entry for dataset '{}': {error}",
            entry.dataset_name
        ))
    })?;

    Ok(())
}

#[cfg(test)]
mod tests;
