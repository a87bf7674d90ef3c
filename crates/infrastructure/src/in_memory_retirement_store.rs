use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sunset_application::AuditRepository;
use sunset_core::{AppError, AppResult};
use sunset_domain::{AuditEntry, Candidate, CandidateId, CandidateStatus, EntityId};
use tokio::sync::RwLock;

mod candidates;
mod datasets;

/// One dataset row keyed by column name.
pub type Row = Map<String, Value>;

#[derive(Debug, Default)]
struct StoreState {
    candidates: BTreeMap<CandidateId, Candidate>,
    next_candidate_id: i64,
    tables: HashMap<String, Vec<Row>>,
    audit_entries: Vec<AuditEntry>,
    status_transitions: Vec<(CandidateId, CandidateStatus)>,
    failing_datasets: HashSet<String>,
    audit_unavailable: bool,
}

/// In-memory candidate table, catalog datasets, and audit log.
///
/// Implements every retirement port over one shared state so a full run can be
/// exercised without a database. Dataset transactions stage their changes and
/// publish them on commit.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRetirementStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryRetirementStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an unassigned pending candidate for a root entity.
    pub async fn seed_candidate(&self, entity_id: EntityId) -> AppResult<CandidateId> {
        let mut state = self.state.write().await;
        if state
            .candidates
            .values()
            .any(|candidate| candidate.entity_id() == entity_id)
        {
            return Err(AppError::Conflict(format!(
                "entity {entity_id} already has a retirement candidate"
            )));
        }

        state.next_candidate_id += 1;
        let candidate_id = CandidateId::new(state.next_candidate_id);
        state
            .candidates
            .insert(candidate_id, Candidate::pending(candidate_id, entity_id));
        Ok(candidate_id)
    }

    /// Appends a row to a dataset, creating the dataset on first use.
    pub async fn insert_row(&self, dataset: &str, row: Value) -> AppResult<()> {
        let Value::Object(row) = row else {
            return Err(AppError::Validation(format!(
                "rows of dataset '{dataset}' must be JSON objects"
            )));
        };

        self.state
            .write()
            .await
            .tables
            .entry(dataset.to_owned())
            .or_default()
            .push(row);
        Ok(())
    }

    /// Returns the committed rows of a dataset.
    pub async fn rows(&self, dataset: &str) -> Vec<Row> {
        self.state
            .read()
            .await
            .tables
            .get(dataset)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the current state of a candidate.
    pub async fn candidate(&self, candidate_id: CandidateId) -> Option<Candidate> {
        self.state
            .read()
            .await
            .candidates
            .get(&candidate_id)
            .cloned()
    }

    /// Returns every committed audit entry in append order.
    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.state.read().await.audit_entries.clone()
    }

    /// Returns every applied status transition in order.
    pub async fn status_transitions(&self) -> Vec<(CandidateId, CandidateStatus)> {
        self.state.read().await.status_transitions.clone()
    }

    /// Makes deletes from `dataset` fail until faults are cleared.
    pub async fn fail_dataset(&self, dataset: &str) {
        self.state
            .write()
            .await
            .failing_datasets
            .insert(dataset.to_owned());
    }

    /// Makes standalone audit appends fail until faults are cleared.
    pub async fn fail_audit_log(&self) {
        self.state.write().await.audit_unavailable = true;
    }

    /// Removes every injected fault.
    pub async fn clear_faults(&self) {
        let mut state = self.state.write().await;
        state.failing_datasets.clear();
        state.audit_unavailable = false;
    }
}

#[async_trait]
impl AuditRepository for InMemoryRetirementStore {
    async fn append_entry(&self, entry: AuditEntry) -> AppResult<()> {
        let mut state = self.state.write().await;
        if state.audit_unavailable {
            return Err(AppError::Internal(
                "audit log is unavailable".to_owned(),
            ));
        }

        state.audit_entries.push(entry);
        Ok(())
    }
}
