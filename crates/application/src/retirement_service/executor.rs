use super::*;

/// Outcome of one archive-then-delete step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetMigration {
    /// No source row matched the working set; nothing was opened or audited.
    Skipped,
    /// The dataset transaction committed.
    Migrated {
        /// Rows copied into the archive destination.
        archived: u64,
        /// Rows removed from the source dataset.
        deleted: u64,
        /// Matching rows left in place because no verified archive copy exists.
        unverified: u64,
    },
}

impl DatasetMigration {
    /// Returns the matching rows the step had to leave in the source dataset.
    #[must_use]
    pub fn unverified(&self) -> u64 {
        match self {
            Self::Skipped => 0,
            Self::Migrated { unverified, .. } => *unverified,
        }
    }
}

impl RetirementService {
    /// Archives then deletes the working set's rows of one dataset in its own transaction.
    pub async fn migrate_dataset(
        &self,
        dataset: &DatasetDescriptor,
        working_set: &WorkingSet,
    ) -> AppResult<DatasetMigration> {
        if !self
            .dataset_repository
            .has_matching_rows(dataset, working_set)
            .await?
        {
            debug!(
                batch_id = %working_set.batch_id,
                dataset = %dataset.source_name(),
                "no matching rows, dataset skipped"
            );
            return Ok(DatasetMigration::Skipped);
        }

        let mut transaction = self
            .dataset_repository
            .begin_dataset_transaction(dataset)
            .await?;

        let result = self
            .archive_then_delete(transaction.as_mut(), dataset, working_set)
            .await;
        let migration = match result {
            Ok(migration) => migration,
            Err(error) => {
                if let Err(rollback_error) = transaction.rollback().await {
                    warn!(
                        batch_id = %working_set.batch_id,
                        dataset = %dataset.source_name(),
                        error = %rollback_error,
                        "failed to roll back dataset transaction"
                    );
                }
                return Err(error);
            }
        };

        transaction.commit().await?;

        if let DatasetMigration::Migrated {
            archived,
            deleted,
            unverified,
        } = migration
        {
            info!(
                batch_id = %working_set.batch_id,
                dataset = %dataset.source_name(),
                archive = %dataset.archive_destination(),
                archived,
                deleted,
                unverified,
                "dataset migrated"
            );
        }

        Ok(migration)
    }

    async fn archive_then_delete(
        &self,
        transaction: &mut dyn DatasetTransaction,
        dataset: &DatasetDescriptor,
        working_set: &WorkingSet,
    ) -> AppResult<DatasetMigration> {
        let dataset_name = dataset.source_name().as_str();

        let archived = transaction
            .archive_matching_rows(dataset, working_set)
            .await?;
        transaction
            .append_audit_entry(AuditEntry::archived(
                working_set.batch_id,
                dataset_name,
                archived,
                &self.actor,
                Utc::now(),
            ))
            .await?;

        // Only rows with an identical archive copy are removed.
        let deleted = transaction
            .delete_archived_rows(dataset, working_set)
            .await?;
        transaction
            .append_audit_entry(AuditEntry::deleted(
                working_set.batch_id,
                dataset_name,
                deleted,
                &self.actor,
                Utc::now(),
            ))
            .await?;

        let unverified = transaction
            .count_matching_rows(dataset, working_set)
            .await?;

        Ok(DatasetMigration::Migrated {
            archived,
            deleted,
            unverified,
        })
    }
}
