use super::DatasetMigration;

/// Counters describing one run that stopped cleanly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Batches whose candidates reached completed.
    pub batches_completed: u32,
    /// Dataset steps that archived and deleted rows.
    pub datasets_migrated: u32,
    /// Dataset steps skipped because no row matched.
    pub datasets_skipped: u32,
    /// Rows copied into archive destinations.
    pub records_archived: u64,
    /// Rows removed from source datasets.
    pub records_deleted: u64,
    /// Candidates excluded by a disqualification rule.
    pub candidates_canceled: u64,
    /// Candidates promoted into a working set.
    pub candidates_promoted: u64,
    /// Candidates that matched neither predicate and stay pending.
    pub candidates_held: u64,
    /// Candidates marked completed.
    pub candidates_completed: u64,
}

impl RunReport {
    /// Returns whether the run touched any dataset.
    #[must_use]
    pub fn performed_dataset_operations(&self) -> bool {
        self.datasets_migrated > 0
    }

    pub(super) fn record_migration(&mut self, migration: DatasetMigration) {
        match migration {
            DatasetMigration::Skipped => self.datasets_skipped += 1,
            DatasetMigration::Migrated { archived, deleted, .. } => {
                self.datasets_migrated += 1;
                self.records_archived += archived;
                self.records_deleted += deleted;
            }
        }
    }
}
