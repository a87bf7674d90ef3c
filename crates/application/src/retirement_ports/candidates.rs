use async_trait::async_trait;
use sunset_core::AppResult;
use sunset_domain::{BatchId, CandidateId, EligibilityPolicy, EligibilityProfile, EntityId};

/// Result of assigning a fresh batch id to unassigned pending candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchAllocation {
    /// Newly allocated batch id.
    pub batch_id: BatchId,
    /// Number of candidates that joined the batch.
    pub candidate_count: u64,
}

/// In-progress members of one batch, rebuilt on every pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingSet {
    /// Batch the members belong to.
    pub batch_id: BatchId,
    /// Candidates currently in progress.
    pub candidate_ids: Vec<CandidateId>,
    /// Root entities of those candidates, joined against every dataset.
    pub entity_ids: Vec<EntityId>,
}

impl WorkingSet {
    /// Returns whether the batch has nothing left to migrate.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entity_ids.is_empty()
    }

    /// Returns raw entity id values for statement binding.
    #[must_use]
    pub fn entity_id_values(&self) -> Vec<i64> {
        self.entity_ids.iter().map(|entity_id| entity_id.value()).collect()
    }
}

/// Repository port for candidate lifecycle state and batch assignment.
///
/// Every status update only touches rows whose current status allows the
/// transition and fails with a conflict when fewer rows than requested moved.
#[async_trait]
pub trait CandidateRepository: Send + Sync {
    /// Returns the lowest batch still holding in-progress candidates.
    async fn find_resumable_batch(&self) -> AppResult<Option<BatchId>>;

    /// Returns the lowest batch still holding candidates that were allocated but never evaluated.
    ///
    /// Held candidates carry a note and do not count.
    async fn find_unevaluated_batch(&self) -> AppResult<Option<BatchId>>;

    /// Assigns `max(batch_id) + 1` to every unassigned pending candidate in one transaction.
    async fn allocate_batch(&self) -> AppResult<Option<BatchAllocation>>;

    /// Loads eligibility facts for the pending candidates of a batch that await evaluation.
    async fn list_pending_profiles(
        &self,
        batch_id: BatchId,
        policy: &EligibilityPolicy,
    ) -> AppResult<Vec<EligibilityProfile>>;

    /// Moves pending candidates to canceled with a reason.
    async fn mark_canceled(
        &self,
        batch_id: BatchId,
        candidate_ids: &[CandidateId],
        reason: &str,
    ) -> AppResult<u64>;

    /// Records a hold note on pending candidates awaiting evaluation; their status stays pending.
    async fn mark_held(
        &self,
        batch_id: BatchId,
        candidate_ids: &[CandidateId],
        note: &str,
    ) -> AppResult<u64>;

    /// Moves pending candidates to in progress.
    async fn mark_in_progress(
        &self,
        batch_id: BatchId,
        candidate_ids: &[CandidateId],
    ) -> AppResult<u64>;

    /// Moves in-progress candidates to completed.
    async fn mark_completed(
        &self,
        batch_id: BatchId,
        candidate_ids: &[CandidateId],
    ) -> AppResult<u64>;

    /// Materializes the working set of a batch.
    async fn select_in_progress(&self, batch_id: BatchId) -> AppResult<WorkingSet>;
}
