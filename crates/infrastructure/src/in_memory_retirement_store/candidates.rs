use super::*;

use chrono::{DateTime, Utc};
use sunset_application::{BatchAllocation, CandidateRepository, WorkingSet};
use sunset_domain::{BatchId, DisqualificationRule, EligibilityPolicy, EligibilityProfile};

#[async_trait]
impl CandidateRepository for InMemoryRetirementStore {
    async fn find_resumable_batch(&self) -> AppResult<Option<BatchId>> {
        Ok(self
            .state
            .read()
            .await
            .candidates
            .values()
            .filter(|candidate| candidate.status() == CandidateStatus::InProgress)
            .filter_map(Candidate::batch_id)
            .min())
    }

    async fn find_unevaluated_batch(&self) -> AppResult<Option<BatchId>> {
        Ok(self
            .state
            .read()
            .await
            .candidates
            .values()
            .filter(|candidate| candidate.awaits_evaluation())
            .filter_map(Candidate::batch_id)
            .min())
    }

    async fn allocate_batch(&self) -> AppResult<Option<BatchAllocation>> {
        let mut state = self.state.write().await;
        let current_max = state
            .candidates
            .values()
            .filter_map(Candidate::batch_id)
            .max();
        let batch_id = BatchId::next_after(current_max);

        let mut candidate_count = 0;
        for candidate in state.candidates.values_mut() {
            if candidate.batch_id().is_none() && candidate.status() == CandidateStatus::Pending {
                candidate.assign_batch(batch_id)?;
                candidate_count += 1;
            }
        }

        Ok((candidate_count > 0).then_some(BatchAllocation {
            batch_id,
            candidate_count,
        }))
    }

    async fn list_pending_profiles(
        &self,
        batch_id: BatchId,
        policy: &EligibilityPolicy,
    ) -> AppResult<Vec<EligibilityProfile>> {
        let state = self.state.read().await;
        let source = policy.profile_source();
        let profile_rows = state
            .tables
            .get(source.dataset().as_str())
            .map(Vec::as_slice)
            .unwrap_or_default();

        state
            .candidates
            .values()
            .filter(|candidate| {
                candidate.batch_id() == Some(batch_id) && candidate.awaits_evaluation()
            })
            .map(|candidate| {
                let entity_id = candidate.entity_id().value();
                let row = profile_rows.iter().find(|row| {
                    column_i64(row, source.key_column().as_str()) == Some(entity_id)
                });

                let last_active_at = match row {
                    Some(row) => parse_timestamp(row, source.last_active_column().as_str())?,
                    None => None,
                };

                Ok(EligibilityProfile {
                    candidate_id: candidate.candidate_id(),
                    entity_id: candidate.entity_id(),
                    role: row.and_then(|row| column_text(row, source.role_column().as_str())),
                    last_active_at,
                    matched_rules: policy
                        .rules()
                        .iter()
                        .filter(|rule| rule_matches(&state.tables, rule, entity_id))
                        .map(|rule| rule.name().to_owned())
                        .collect(),
                })
            })
            .collect()
    }

    async fn mark_canceled(
        &self,
        batch_id: BatchId,
        candidate_ids: &[CandidateId],
        reason: &str,
    ) -> AppResult<u64> {
        self.transition(
            batch_id,
            candidate_ids,
            CandidateStatus::Pending,
            CandidateStatus::Canceled,
            Some(reason),
        )
        .await
    }

    async fn mark_held(
        &self,
        batch_id: BatchId,
        candidate_ids: &[CandidateId],
        note: &str,
    ) -> AppResult<u64> {
        let mut state = self.state.write().await;

        let holdable = candidate_ids
            .iter()
            .filter(|candidate_id| {
                state.candidates.get(*candidate_id).is_some_and(|candidate| {
                    candidate.batch_id() == Some(batch_id) && candidate.awaits_evaluation()
                })
            })
            .count();
        if holdable != candidate_ids.len() {
            return Err(AppError::Conflict(format!(
                "only {holdable} of {} candidates in batch {batch_id} were awaiting evaluation and could be held",
                candidate_ids.len()
            )));
        }

        for candidate_id in candidate_ids {
            if let Some(candidate) = state.candidates.get_mut(candidate_id) {
                candidate.hold(note)?;
            }
        }

        Ok(u64::try_from(candidate_ids.len()).unwrap_or(u64::MAX))
    }

    async fn mark_in_progress(
        &self,
        batch_id: BatchId,
        candidate_ids: &[CandidateId],
    ) -> AppResult<u64> {
        self.transition(
            batch_id,
            candidate_ids,
            CandidateStatus::Pending,
            CandidateStatus::InProgress,
            None,
        )
        .await
    }

    async fn mark_completed(
        &self,
        batch_id: BatchId,
        candidate_ids: &[CandidateId],
    ) -> AppResult<u64> {
        self.transition(
            batch_id,
            candidate_ids,
            CandidateStatus::InProgress,
            CandidateStatus::Completed,
            None,
        )
        .await
    }

    async fn select_in_progress(&self, batch_id: BatchId) -> AppResult<WorkingSet> {
        let state = self.state.read().await;
        let members: Vec<&Candidate> = state
            .candidates
            .values()
            .filter(|candidate| {
                candidate.batch_id() == Some(batch_id)
                    && candidate.status() == CandidateStatus::InProgress
            })
            .collect();

        Ok(WorkingSet {
            batch_id,
            candidate_ids: members.iter().map(|candidate| candidate.candidate_id()).collect(),
            entity_ids: members.iter().map(|candidate| candidate.entity_id()).collect(),
        })
    }
}

impl InMemoryRetirementStore {
    /// Applies one transition to every listed candidate or to none of them.
    async fn transition(
        &self,
        batch_id: BatchId,
        candidate_ids: &[CandidateId],
        from: CandidateStatus,
        to: CandidateStatus,
        note: Option<&str>,
    ) -> AppResult<u64> {
        let mut state = self.state.write().await;

        let movable = candidate_ids
            .iter()
            .filter(|candidate_id| {
                state.candidates.get(*candidate_id).is_some_and(|candidate| {
                    candidate.batch_id() == Some(batch_id) && candidate.status() == from
                })
            })
            .count();
        if movable != candidate_ids.len() {
            return Err(AppError::Conflict(format!(
                "only {movable} of {} candidates in batch {batch_id} were {} and could move to {}",
                candidate_ids.len(),
                from.as_str(),
                to.as_str()
            )));
        }

        for candidate_id in candidate_ids {
            if let Some(candidate) = state.candidates.get_mut(candidate_id) {
                candidate.transition_to(to, note.map(str::to_owned))?;
            }
            state.status_transitions.push((*candidate_id, to));
        }

        Ok(u64::try_from(candidate_ids.len()).unwrap_or(u64::MAX))
    }
}

fn rule_matches(
    tables: &HashMap<String, Vec<Row>>,
    rule: &DisqualificationRule,
    entity_id: i64,
) -> bool {
    tables.get(rule.dataset().as_str()).is_some_and(|rows| {
        rows.iter().any(|row| {
            column_i64(row, rule.join_key().as_str()) == Some(entity_id)
                && rule.matches_status(
                    rule.status_column()
                        .and_then(|column| row.get(column.as_str()))
                        .and_then(Value::as_str),
                )
        })
    })
}

pub(super) fn column_i64(row: &Row, column: &str) -> Option<i64> {
    row.get(column).and_then(Value::as_i64)
}

fn column_text(row: &Row, column: &str) -> Option<String> {
    match row.get(column) {
        Some(Value::String(value)) => Some(value.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    }
}

fn parse_timestamp(row: &Row, column: &str) -> AppResult<Option<DateTime<Utc>>> {
    match row.get(column) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => DateTime::parse_from_rfc3339(value)
            .map(|timestamp| Some(timestamp.with_timezone(&Utc)))
            .map_err(|error| {
                AppError::Validation(format!(
                    "column '{column}' holds invalid timestamp '{value}': {error}"
                ))
            }),
        Some(other) => Err(AppError::Validation(format!(
            "column '{column}' holds non-text timestamp {other}"
        ))),
    }
}
