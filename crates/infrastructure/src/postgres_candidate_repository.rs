use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::warn;

use sunset_application::{BatchAllocation, CandidateRepository, WorkingSet};
use sunset_core::{AppError, AppResult};
use sunset_domain::{
    BatchId, CandidateId, CandidateStatus, DisqualificationRule, EligibilityPolicy,
    EligibilityProfile, EntityId,
};

/// PostgreSQL-backed candidate lifecycle repository.
#[derive(Clone)]
pub struct PostgresCandidateRepository {
    pool: PgPool,
}

impl PostgresCandidateRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct PendingProfileRow {
    id: i64,
    entity_id: i64,
    role: Option<String>,
    last_active_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct WorkingSetRow {
    id: i64,
    entity_id: i64,
}

#[async_trait]
impl CandidateRepository for PostgresCandidateRepository {
    async fn find_resumable_batch(&self) -> AppResult<Option<BatchId>> {
        let batch_id = sqlx::query_scalar::<_, Option<i64>>(
            r#"
            SELECT MIN(batch_id)
            FROM retirement_candidates
            WHERE status = 'in_progress'
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to look up resumable batch: {error}"))
        })?;

        batch_id.map(BatchId::new).transpose()
    }

    async fn find_unevaluated_batch(&self) -> AppResult<Option<BatchId>> {
        let batch_id = sqlx::query_scalar::<_, Option<i64>>(
            r#"
            SELECT MIN(batch_id)
            FROM retirement_candidates
            WHERE status = 'pending'
              AND batch_id IS NOT NULL
              AND note IS NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to look up unevaluated batch: {error}"))
        })?;

        batch_id.map(BatchId::new).transpose()
    }

    async fn allocate_batch(&self) -> AppResult<Option<BatchAllocation>> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!(
                "failed to start batch allocation transaction: {error}"
            ))
        })?;

        let current_max = sqlx::query_scalar::<_, Option<i64>>(
            r#"
            SELECT MAX(batch_id)
            FROM retirement_candidates
            "#,
        )
        .fetch_one(&mut *transaction)
        .await
        .map_err(|error| AppError::Internal(format!("failed to read highest batch id: {error}")))?
        .map(BatchId::new)
        .transpose()?;
        let batch_id = BatchId::next_after(current_max);

        let assigned = sqlx::query(
            r#"
            UPDATE retirement_candidates
            SET batch_id = $1, updated_at = now()
            WHERE batch_id IS NULL
              AND status = 'pending'
            "#,
        )
        .bind(batch_id.value())
        .execute(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to assign batch {batch_id} to pending candidates: {error}"
            ))
        })?
        .rows_affected();

        if assigned == 0 {
            transaction.rollback().await.map_err(|error| {
                AppError::Internal(format!(
                    "failed to roll back empty batch allocation: {error}"
                ))
            })?;
            return Ok(None);
        }

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!(
                "failed to commit allocation of batch {batch_id}: {error}"
            ))
        })?;

        Ok(Some(BatchAllocation {
            batch_id,
            candidate_count: assigned,
        }))
    }

    async fn list_pending_profiles(
        &self,
        batch_id: BatchId,
        policy: &EligibilityPolicy,
    ) -> AppResult<Vec<EligibilityProfile>> {
        let source = policy.profile_source();
        let profile_query = format!(
            r#"
            SELECT
                candidates.id,
                candidates.entity_id,
                profile.{role}::TEXT AS role,
                profile.{last_active}::TIMESTAMPTZ AS last_active_at
            FROM retirement_candidates candidates
            LEFT JOIN {dataset} profile
                ON profile.{key} = candidates.entity_id
            WHERE candidates.batch_id = $1
              AND candidates.status = 'pending'
              AND candidates.note IS NULL
            ORDER BY candidates.id
            "#,
            role = source.role_column().quoted(),
            last_active = source.last_active_column().quoted(),
            dataset = source.dataset().quoted(),
            key = source.key_column().quoted(),
        );

        let rows = sqlx::query_as::<_, PendingProfileRow>(profile_query.as_str())
            .bind(batch_id.value())
            .fetch_all(&self.pool)
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to load pending profiles for batch {batch_id} from '{}': {error}",
                    source.dataset()
                ))
            })?;

        let mut matches: HashMap<i64, Vec<String>> = HashMap::new();
        for rule in policy.rules() {
            for entity_id in self.entities_matching_rule(batch_id, rule).await? {
                matches
                    .entry(entity_id)
                    .or_default()
                    .push(rule.name().to_owned());
            }
        }

        Ok(rows
            .into_iter()
            .map(|row| EligibilityProfile {
                candidate_id: CandidateId::new(row.id),
                entity_id: EntityId::new(row.entity_id),
                role: row.role,
                last_active_at: row.last_active_at,
                matched_rules: matches.remove(&row.entity_id).unwrap_or_default(),
            })
            .collect())
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
        if candidate_ids.is_empty() {
            return Ok(0);
        }

        let ids: Vec<i64> = candidate_ids.iter().map(|id| id.value()).collect();
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to start candidate hold transaction: {error}"))
        })?;

        let held = sqlx::query(
            r#"
            UPDATE retirement_candidates
            SET note = $3, updated_at = now()
            WHERE batch_id = $1
              AND id = ANY($2)
              AND status = 'pending'
              AND note IS NULL
            "#,
        )
        .bind(batch_id.value())
        .bind(ids.as_slice())
        .bind(note)
        .execute(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to hold candidates in batch {batch_id}: {error}"
            ))
        })?
        .rows_affected();

        let expected = u64::try_from(ids.len()).unwrap_or(u64::MAX);
        if held != expected {
            warn!(
                batch_id = %batch_id,
                held,
                expected,
                "rolling back partial candidate hold"
            );
            transaction.rollback().await.map_err(|error| {
                AppError::Internal(format!(
                    "failed to roll back partial candidate hold: {error}"
                ))
            })?;
            return Err(AppError::Conflict(format!(
                "only {held} of {expected} candidates in batch {batch_id} were awaiting evaluation and could be held"
            )));
        }

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!(
                "failed to commit candidate hold in batch {batch_id}: {error}"
            ))
        })?;

        Ok(held)
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
        let rows = sqlx::query_as::<_, WorkingSetRow>(
            r#"
            SELECT id, entity_id
            FROM retirement_candidates
            WHERE batch_id = $1
              AND status = 'in_progress'
            ORDER BY id
            "#,
        )
        .bind(batch_id.value())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to select working set of batch {batch_id}: {error}"
            ))
        })?;

        Ok(WorkingSet {
            batch_id,
            candidate_ids: rows.iter().map(|row| CandidateId::new(row.id)).collect(),
            entity_ids: rows.iter().map(|row| EntityId::new(row.entity_id)).collect(),
        })
    }
}

impl PostgresCandidateRepository {
    async fn entities_matching_rule(
        &self,
        batch_id: BatchId,
        rule: &DisqualificationRule,
    ) -> AppResult<HashSet<i64>> {
        let status_filter = match rule.status_column() {
            Some(column) => format!("AND linked.{}::TEXT = ANY($2)", column.quoted()),
            None => String::new(),
        };
        let rule_query = format!(
            r#"
            SELECT DISTINCT candidates.entity_id
            FROM retirement_candidates candidates
            INNER JOIN {dataset} linked
                ON linked.{join_key} = candidates.entity_id
            WHERE candidates.batch_id = $1
              AND candidates.status = 'pending'
              AND candidates.note IS NULL
              {status_filter}
            "#,
            dataset = rule.dataset().quoted(),
            join_key = rule.join_key().quoted(),
        );

        let mut query = sqlx::query_scalar::<_, i64>(rule_query.as_str()).bind(batch_id.value());
        if rule.status_column().is_some() {
            query = query.bind(rule.status_values().to_vec());
        }

        let entity_ids = query.fetch_all(&self.pool).await.map_err(|error| {
            AppError::Internal(format!(
                "failed to evaluate disqualification rule '{}' for batch {batch_id}: {error}",
                rule.name()
            ))
        })?;

        Ok(entity_ids.into_iter().collect())
    }

    async fn transition(
        &self,
        batch_id: BatchId,
        candidate_ids: &[CandidateId],
        from: CandidateStatus,
        to: CandidateStatus,
        note: Option<&str>,
    ) -> AppResult<u64> {
        if candidate_ids.is_empty() {
            return Ok(0);
        }

        let ids: Vec<i64> = candidate_ids.iter().map(|id| id.value()).collect();
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!(
                "failed to start candidate status transaction: {error}"
            ))
        })?;

        let moved = sqlx::query(
            r#"
            UPDATE retirement_candidates
            SET
                status = $4,
                note = COALESCE($5, note),
                updated_at = now()
            WHERE batch_id = $1
              AND id = ANY($2)
              AND status = $3
            "#,
        )
        .bind(batch_id.value())
        .bind(ids.as_slice())
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(note)
        .execute(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to mark candidates {} in batch {batch_id}: {error}",
                to.as_str()
            ))
        })?
        .rows_affected();

        let expected = u64::try_from(ids.len()).unwrap_or(u64::MAX);
        if moved != expected {
            warn!(
                batch_id = %batch_id,
                moved,
                expected,
                to = to.as_str(),
                "rolling back partial candidate status update"
            );
            transaction.rollback().await.map_err(|error| {
                AppError::Internal(format!(
                    "failed to roll back partial candidate status update: {error}"
                ))
            })?;
            return Err(AppError::Conflict(format!(
                "only {moved} of {expected} candidates in batch {batch_id} were {} and could move to {}",
                from.as_str(),
                to.as_str()
            )));
        }

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!(
                "failed to commit candidate status update in batch {batch_id}: {error}"
            ))
        })?;

        Ok(moved)
    }
}
