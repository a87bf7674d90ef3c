use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use sunset_application::{DatasetMigrationRepository, DatasetTransaction, WorkingSet};
use sunset_core::{AppError, AppResult};
use sunset_domain::{AuditEntry, DatasetDescriptor};

use crate::postgres_audit_repository::insert_audit_entry;

mod statements;

/// PostgreSQL-backed archive-then-delete repository for catalog datasets.
///
/// Archive destinations must mirror their source's columns in the same order
/// (`CREATE TABLE x_archive (LIKE x)`); archived copies are verified by
/// comparing whole rows.
#[derive(Clone)]
pub struct PostgresDatasetMigrationRepository {
    pool: PgPool,
}

impl PostgresDatasetMigrationRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DatasetMigrationRepository for PostgresDatasetMigrationRepository {
    async fn has_matching_rows(
        &self,
        dataset: &DatasetDescriptor,
        working_set: &WorkingSet,
    ) -> AppResult<bool> {
        let statement = statements::probe(dataset);
        sqlx::query_scalar::<_, bool>(statement.as_str())
            .bind(working_set.entity_id_values())
            .fetch_one(&self.pool)
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to probe dataset '{}' for batch {}: {error}",
                    dataset.source_name(),
                    working_set.batch_id
                ))
            })
    }

    async fn begin_dataset_transaction(
        &self,
        dataset: &DatasetDescriptor,
    ) -> AppResult<Box<dyn DatasetTransaction>> {
        let transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!(
                "failed to start transaction for dataset '{}': {error}",
                dataset.source_name()
            ))
        })?;

        Ok(Box::new(PostgresDatasetTransaction {
            dataset_name: dataset.source_name().as_str().to_owned(),
            transaction,
        }))
    }
}

struct PostgresDatasetTransaction {
    dataset_name: String,
    transaction: Transaction<'static, Postgres>,
}

#[async_trait]
impl DatasetTransaction for PostgresDatasetTransaction {
    async fn archive_matching_rows(
        &mut self,
        dataset: &DatasetDescriptor,
        working_set: &WorkingSet,
    ) -> AppResult<u64> {
        let statement = statements::archive(dataset);
        let result = sqlx::query(statement.as_str())
            .bind(working_set.entity_id_values())
            .execute(&mut *self.transaction)
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to archive rows of dataset '{}' into '{}' for batch {}: {error}",
                    dataset.source_name(),
                    dataset.archive_destination(),
                    working_set.batch_id
                ))
            })?;

        Ok(result.rows_affected())
    }

    async fn delete_archived_rows(
        &mut self,
        dataset: &DatasetDescriptor,
        working_set: &WorkingSet,
    ) -> AppResult<u64> {
        let statement = statements::delete_archived(dataset);
        let result = sqlx::query(statement.as_str())
            .bind(working_set.entity_id_values())
            .execute(&mut *self.transaction)
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to delete archived rows of dataset '{}' for batch {}: {error}",
                    dataset.source_name(),
                    working_set.batch_id
                ))
            })?;

        Ok(result.rows_affected())
    }

    async fn count_matching_rows(
        &mut self,
        dataset: &DatasetDescriptor,
        working_set: &WorkingSet,
    ) -> AppResult<u64> {
        let statement = statements::count_matching(dataset);
        let count = sqlx::query_scalar::<_, i64>(statement.as_str())
            .bind(working_set.entity_id_values())
            .fetch_one(&mut *self.transaction)
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to count remaining rows of dataset '{}' for batch {}: {error}",
                    dataset.source_name(),
                    working_set.batch_id
                ))
            })?;

        u64::try_from(count).map_err(|error| {
            AppError::Internal(format!(
                "invalid row count {count} for dataset '{}': {error}",
                dataset.source_name()
            ))
        })
    }

    async fn append_audit_entry(&mut self, entry: AuditEntry) -> AppResult<()> {
        insert_audit_entry(&mut *self.transaction, &entry).await
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let Self {
            dataset_name,
            transaction,
        } = *self;
        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!(
                "failed to commit transaction for dataset '{dataset_name}': {error}"
            ))
        })
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        let Self {
            dataset_name,
            transaction,
        } = *self;
        transaction.rollback().await.map_err(|error| {
            AppError::Internal(format!(
                "failed to roll back transaction for dataset '{dataset_name}': {error}"
            ))
        })
    }
}

#[cfg(test)]
mod tests;
