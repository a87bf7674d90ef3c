use async_trait::async_trait;
use sunset_core::AppResult;
use sunset_domain::{AuditEntry, DatasetDescriptor};

use super::candidates::WorkingSet;

/// Repository port for archive-then-delete migration of catalog datasets.
#[async_trait]
pub trait DatasetMigrationRepository: Send + Sync {
    /// Returns whether any source row belongs to a working-set entity.
    async fn has_matching_rows(
        &self,
        dataset: &DatasetDescriptor,
        working_set: &WorkingSet,
    ) -> AppResult<bool>;

    /// Opens a transaction scoped to one dataset.
    async fn begin_dataset_transaction(
        &self,
        dataset: &DatasetDescriptor,
    ) -> AppResult<Box<dyn DatasetTransaction>>;
}

/// Open dataset-scoped transaction. Dropping it without commit rolls back.
#[async_trait]
pub trait DatasetTransaction: Send {
    /// Copies matching source rows not yet archived into the archive destination.
    async fn archive_matching_rows(
        &mut self,
        dataset: &DatasetDescriptor,
        working_set: &WorkingSet,
    ) -> AppResult<u64>;

    /// Deletes matching source rows that are verified present in the archive destination.
    async fn delete_archived_rows(
        &mut self,
        dataset: &DatasetDescriptor,
        working_set: &WorkingSet,
    ) -> AppResult<u64>;

    /// Counts matching source rows still present.
    async fn count_matching_rows(
        &mut self,
        dataset: &DatasetDescriptor,
        working_set: &WorkingSet,
    ) -> AppResult<u64>;

    /// Appends an audit entry that commits or rolls back with this transaction.
    ///
    /// Step entries ("records archived", "records deleted") go through here so
    /// they are durable exactly when the dataset migration is; a rolled-back
    /// step leaves no entry behind. Only failure entries use the standalone
    /// [`AuditRepository`](super::AuditRepository), which commits regardless of
    /// any open transaction.
    async fn append_audit_entry(&mut self, entry: AuditEntry) -> AppResult<()>;

    /// Commits the transaction.
    async fn commit(self: Box<Self>) -> AppResult<()>;

    /// Rolls the transaction back.
    async fn rollback(self: Box<Self>) -> AppResult<()>;
}
