use super::*;

use sunset_application::{DatasetMigrationRepository, DatasetTransaction, WorkingSet};
use sunset_domain::DatasetDescriptor;

use super::candidates::column_i64;

#[async_trait]
impl DatasetMigrationRepository for InMemoryRetirementStore {
    async fn has_matching_rows(
        &self,
        dataset: &DatasetDescriptor,
        working_set: &WorkingSet,
    ) -> AppResult<bool> {
        let state = self.state.read().await;
        let owners = owner_keys(dataset, &state.tables, working_set);

        Ok(state
            .tables
            .get(dataset.source_name().as_str())
            .is_some_and(|rows| rows.iter().any(|row| is_owned(dataset, row, &owners))))
    }

    async fn begin_dataset_transaction(
        &self,
        dataset: &DatasetDescriptor,
    ) -> AppResult<Box<dyn DatasetTransaction>> {
        let state = self.state.read().await;
        let table = |name: &str| state.tables.get(name).cloned().unwrap_or_default();

        Ok(Box::new(InMemoryDatasetTransaction {
            state: Arc::clone(&self.state),
            source_name: dataset.source_name().as_str().to_owned(),
            archive_name: dataset.archive_destination().as_str().to_owned(),
            source: table(dataset.source_name().as_str()),
            archive: table(dataset.archive_destination().as_str()),
            tables_snapshot: state.tables.clone(),
            staged_audit: Vec::new(),
        }))
    }
}

struct InMemoryDatasetTransaction {
    state: Arc<RwLock<StoreState>>,
    source_name: String,
    archive_name: String,
    source: Vec<Row>,
    archive: Vec<Row>,
    tables_snapshot: HashMap<String, Vec<Row>>,
    staged_audit: Vec<AuditEntry>,
}

#[async_trait]
impl DatasetTransaction for InMemoryDatasetTransaction {
    async fn archive_matching_rows(
        &mut self,
        dataset: &DatasetDescriptor,
        working_set: &WorkingSet,
    ) -> AppResult<u64> {
        let owners = owner_keys(dataset, &self.tables_snapshot, working_set);
        let pending: Vec<Row> = self
            .source
            .iter()
            .filter(|row| is_owned(dataset, row, &owners) && !self.archive.contains(row))
            .cloned()
            .collect();

        let archived = u64::try_from(pending.len()).unwrap_or(u64::MAX);
        self.archive.extend(pending);
        Ok(archived)
    }

    async fn delete_archived_rows(
        &mut self,
        dataset: &DatasetDescriptor,
        working_set: &WorkingSet,
    ) -> AppResult<u64> {
        if self
            .state
            .read()
            .await
            .failing_datasets
            .contains(dataset.source_name().as_str())
        {
            return Err(AppError::Internal(format!(
                "failed to delete archived rows of dataset '{}' for batch {}: injected fault",
                dataset.source_name(),
                working_set.batch_id
            )));
        }

        let owners = owner_keys(dataset, &self.tables_snapshot, working_set);
        let before = self.source.len();
        let archive = &self.archive;
        self.source
            .retain(|row| !(is_owned(dataset, row, &owners) && archive.contains(row)));

        Ok(u64::try_from(before - self.source.len()).unwrap_or(u64::MAX))
    }

    async fn count_matching_rows(
        &mut self,
        dataset: &DatasetDescriptor,
        working_set: &WorkingSet,
    ) -> AppResult<u64> {
        let owners = owner_keys(dataset, &self.tables_snapshot, working_set);
        let remaining = self
            .source
            .iter()
            .filter(|row| is_owned(dataset, row, &owners))
            .count();

        Ok(u64::try_from(remaining).unwrap_or(u64::MAX))
    }

    async fn append_audit_entry(&mut self, entry: AuditEntry) -> AppResult<()> {
        self.staged_audit.push(entry);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let Self {
            state,
            source_name,
            archive_name,
            source,
            archive,
            staged_audit,
            ..
        } = *self;

        let mut state = state.write().await;
        state.tables.insert(source_name, source);
        state.tables.insert(archive_name, archive);
        state.audit_entries.extend(staged_audit);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        Ok(())
    }
}

/// Values of the join key that tie a row of `dataset` to the working set.
fn owner_keys(
    dataset: &DatasetDescriptor,
    tables: &HashMap<String, Vec<Row>>,
    working_set: &WorkingSet,
) -> HashSet<i64> {
    let entity_ids: HashSet<i64> = working_set.entity_id_values().into_iter().collect();

    match dataset.via() {
        None => entity_ids,
        Some(via) => tables
            .get(via.dataset().as_str())
            .map(|parents| {
                parents
                    .iter()
                    .filter(|parent| {
                        column_i64(parent, via.join_key().as_str())
                            .is_some_and(|entity_id| entity_ids.contains(&entity_id))
                    })
                    .filter_map(|parent| column_i64(parent, via.key().as_str()))
                    .collect()
            })
            .unwrap_or_default(),
    }
}

fn is_owned(dataset: &DatasetDescriptor, row: &Row, owners: &HashSet<i64>) -> bool {
    column_i64(row, dataset.join_key().as_str()).is_some_and(|key| owners.contains(&key))
}
