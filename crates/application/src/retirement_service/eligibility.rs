use std::collections::BTreeMap;

use super::*;

/// Per-batch eligibility outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct EvaluationSummary {
    pub(super) canceled: u64,
    pub(super) promoted: u64,
    pub(super) held: u64,
}

impl RetirementService {
    /// Cancels disqualified candidates and promotes dormant ones.
    ///
    /// Candidates matching neither predicate stay pending in the batch with a
    /// hold note and are not revisited by later batches. Promotion is written
    /// last: until it commits, every undecided candidate still awaits
    /// evaluation, so an interrupted batch is evaluated again by the next run.
    pub(super) async fn evaluate_batch(&self, batch_id: BatchId) -> AppResult<EvaluationSummary> {
        let profiles = self
            .candidate_repository
            .list_pending_profiles(batch_id, &self.policy)
            .await?;
        let now = Utc::now();

        let mut cancellations: BTreeMap<String, Vec<CandidateId>> = BTreeMap::new();
        let mut promoted: Vec<CandidateId> = Vec::new();
        let mut held: Vec<CandidateId> = Vec::new();

        for profile in &profiles {
            match self.policy.evaluate(profile, now) {
                EligibilityDecision::Cancel { reason } => {
                    cancellations
                        .entry(reason)
                        .or_default()
                        .push(profile.candidate_id);
                }
                EligibilityDecision::Promote => promoted.push(profile.candidate_id),
                EligibilityDecision::Hold => held.push(profile.candidate_id),
            }
        }

        let mut summary = EvaluationSummary::default();

        for (reason, candidate_ids) in &cancellations {
            summary.canceled += self
                .candidate_repository
                .mark_canceled(batch_id, candidate_ids.as_slice(), reason.as_str())
                .await?;
        }

        if !held.is_empty() {
            summary.held = self
                .candidate_repository
                .mark_held(batch_id, held.as_slice(), HELD_NOTE)
                .await?;
            warn!(
                batch_id = %batch_id,
                held = held.len(),
                candidate_ids = ?held,
                "candidates matched neither disqualification nor promotion and stay pending"
            );
        }

        if !promoted.is_empty() {
            summary.promoted = self
                .candidate_repository
                .mark_in_progress(batch_id, promoted.as_slice())
                .await?;
        }

        info!(
            batch_id = %batch_id,
            evaluated = profiles.len(),
            canceled = summary.canceled,
            promoted = summary.promoted,
            held = summary.held,
            "batch evaluated"
        );

        Ok(summary)
    }
}
