use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sunset_core::ActorIdentity;

use crate::BatchId;

/// Dataset name recorded on failure entries raised outside any dataset step.
pub const NO_DATASET: &str = "-";

/// Orchestrator phase active when an audit entry was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Looking for a batch an earlier run left in progress or did not finish evaluating.
    ResumeBatch,
    /// Assigning a new batch id to unassigned pending candidates.
    AllocateBatch,
    /// Applying disqualification and promotion predicates.
    Evaluate,
    /// Materializing the in-progress entity ids of the batch.
    BuildWorkingSet,
    /// Migrating a dependent dataset.
    ProcessDatasets,
    /// Migrating the root-entity dataset.
    ProcessRootEntityDataset,
    /// Marking the batch's candidates completed.
    MarkCandidatesCompleted,
}

impl RunPhase {
    /// Returns a stable storage value for this phase.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResumeBatch => "resume_batch",
            Self::AllocateBatch => "allocate_batch",
            Self::Evaluate => "evaluate",
            Self::BuildWorkingSet => "build_working_set",
            Self::ProcessDatasets => "process_datasets",
            Self::ProcessRootEntityDataset => "process_root_entity_dataset",
            Self::MarkCandidatesCompleted => "mark_candidates_completed",
        }
    }
}

/// Append-only record of one migration step or failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Batch active when the entry was written, if one was allocated.
    pub batch_id: Option<BatchId>,
    /// Source dataset of the step, or [`NO_DATASET`].
    pub dataset_name: String,
    /// Human-readable step description.
    pub message: String,
    /// Error text for failure entries.
    pub error_info: Option<String>,
    /// Configured actor the run is attributed to.
    pub actor_id: String,
    /// Time the step happened.
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Entry for rows copied into an archive destination.
    #[must_use]
    pub fn archived(
        batch_id: BatchId,
        dataset_name: &str,
        count: u64,
        actor: &ActorIdentity,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            batch_id: Some(batch_id),
            dataset_name: dataset_name.to_owned(),
            message: format!("records archived: {count}"),
            error_info: None,
            actor_id: actor.actor_id().to_owned(),
            recorded_at,
        }
    }

    /// Entry for rows removed from a source dataset.
    #[must_use]
    pub fn deleted(
        batch_id: BatchId,
        dataset_name: &str,
        count: u64,
        actor: &ActorIdentity,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            batch_id: Some(batch_id),
            dataset_name: dataset_name.to_owned(),
            message: format!("records deleted: {count}"),
            error_info: None,
            actor_id: actor.actor_id().to_owned(),
            recorded_at,
        }
    }

    /// Entry for the error that terminated a run.
    #[must_use]
    pub fn failed(
        batch_id: Option<BatchId>,
        dataset_name: Option<&str>,
        phase: RunPhase,
        error_info: String,
        actor: &ActorIdentity,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            batch_id,
            dataset_name: dataset_name.unwrap_or(NO_DATASET).to_owned(),
            message: format!("failed during {}", phase.as_str()),
            error_info: Some(error_info),
            actor_id: actor.actor_id().to_owned(),
            recorded_at,
        }
    }

    /// Returns whether this entry records a run failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.error_info.is_some()
    }
}
