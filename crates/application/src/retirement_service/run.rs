use super::*;

/// Position of the run, recorded on the failure entry if a step errors.
#[derive(Debug, Clone)]
struct RunCursor {
    phase: RunPhase,
    batch_id: Option<BatchId>,
    dataset_name: Option<String>,
}

impl RunCursor {
    fn new() -> Self {
        Self {
            phase: RunPhase::ResumeBatch,
            batch_id: None,
            dataset_name: None,
        }
    }

    fn enter(&mut self, phase: RunPhase) {
        self.phase = phase;
        self.dataset_name = None;
    }

    fn enter_dataset(&mut self, phase: RunPhase, dataset: &DatasetDescriptor) {
        self.phase = phase;
        self.dataset_name = Some(dataset.source_name().as_str().to_owned());
    }
}

impl RetirementService {
    /// Runs batches until no eligible candidate remains or a step fails.
    ///
    /// A failure rolls back the open dataset transaction, appends a failure
    /// audit entry naming the batch, dataset, and phase, and ends the run with
    /// the error. There is no retry inside a run.
    pub async fn run(&self) -> AppResult<RunReport> {
        let mut cursor = RunCursor::new();
        let mut report = RunReport::default();

        info!(
            actor_id = %self.actor.actor_id(),
            datasets = self.catalog.len(),
            dormancy_threshold_days = self.policy.dormancy_threshold_days(),
            "retirement run started"
        );

        match self.run_batches(&mut cursor, &mut report).await {
            Ok(()) => {
                info!(
                    batches_completed = report.batches_completed,
                    datasets_migrated = report.datasets_migrated,
                    datasets_skipped = report.datasets_skipped,
                    records_archived = report.records_archived,
                    records_deleted = report.records_deleted,
                    candidates_completed = report.candidates_completed,
                    candidates_held = report.candidates_held,
                    "retirement run stopped clean"
                );
                Ok(report)
            }
            Err(run_error) => Err(self.record_failure(&cursor, run_error).await),
        }
    }

    async fn run_batches(&self, cursor: &mut RunCursor, report: &mut RunReport) -> AppResult<()> {
        loop {
            let Some(batch_id) = self.activate_batch(cursor, report).await? else {
                return Ok(());
            };

            cursor.enter(RunPhase::BuildWorkingSet);
            let working_set = self
                .candidate_repository
                .select_in_progress(batch_id)
                .await?;
            if working_set.is_empty() {
                debug!(batch_id = %batch_id, "working set is empty");
                return Ok(());
            }

            for dataset in self.catalog.dependents() {
                cursor.enter_dataset(RunPhase::ProcessDatasets, dataset);
                let migration = self.migrate_dataset(dataset, &working_set).await?;
                report.record_migration(migration);
                ensure_fully_migrated(dataset, &working_set, migration)?;
            }

            let root = self.catalog.root();
            cursor.enter_dataset(RunPhase::ProcessRootEntityDataset, root);
            let migration = self.migrate_dataset(root, &working_set).await?;
            report.record_migration(migration);
            ensure_fully_migrated(root, &working_set, migration)?;

            cursor.enter(RunPhase::MarkCandidatesCompleted);
            report.candidates_completed += self
                .candidate_repository
                .mark_completed(batch_id, working_set.candidate_ids.as_slice())
                .await?;
            report.batches_completed += 1;

            info!(
                batch_id = %batch_id,
                candidates = working_set.candidate_ids.len(),
                "batch completed"
            );
        }
    }

    /// Picks the active batch: one left in progress, else one whose evaluation
    /// was interrupted, else a freshly allocated one. Returns `None` when no
    /// candidate is waiting.
    async fn activate_batch(
        &self,
        cursor: &mut RunCursor,
        report: &mut RunReport,
    ) -> AppResult<Option<BatchId>> {
        cursor.enter(RunPhase::ResumeBatch);
        if let Some(batch_id) = self.candidate_repository.find_resumable_batch().await? {
            info!(batch_id = %batch_id, "resuming batch left in progress");
            cursor.batch_id = Some(batch_id);
            return Ok(Some(batch_id));
        }

        let batch_id = match self.candidate_repository.find_unevaluated_batch().await? {
            Some(batch_id) => {
                info!(batch_id = %batch_id, "resuming interrupted batch evaluation");
                batch_id
            }
            None => {
                cursor.enter(RunPhase::AllocateBatch);
                let Some(allocation) = self.candidate_repository.allocate_batch().await? else {
                    debug!("no unassigned pending candidates");
                    return Ok(None);
                };
                info!(
                    batch_id = %allocation.batch_id,
                    candidates = allocation.candidate_count,
                    "batch allocated"
                );
                allocation.batch_id
            }
        };
        cursor.batch_id = Some(batch_id);

        cursor.enter(RunPhase::Evaluate);
        let summary = self.evaluate_batch(batch_id).await?;
        report.candidates_canceled += summary.canceled;
        report.candidates_promoted += summary.promoted;
        report.candidates_held += summary.held;

        Ok(Some(batch_id))
    }

    async fn record_failure(&self, cursor: &RunCursor, run_error: AppError) -> AppError {
        error!(
            batch_id = ?cursor.batch_id.map(BatchId::value),
            dataset = cursor.dataset_name.as_deref().unwrap_or(sunset_domain::NO_DATASET),
            phase = cursor.phase.as_str(),
            error = %run_error,
            "retirement run failed"
        );

        let entry = AuditEntry::failed(
            cursor.batch_id,
            cursor.dataset_name.as_deref(),
            cursor.phase,
            run_error.to_string(),
            &self.actor,
            Utc::now(),
        );

        match self.audit_repository.append_entry(entry).await {
            Ok(()) => run_error,
            Err(audit_error) => AppError::Internal(format!(
                "{run_error}; failed to record failure audit entry: {audit_error}"
            )),
        }
    }
}

/// Fails the batch when a committed step left matching rows behind.
///
/// The verified part of the step stays committed. The candidates stay in
/// progress, so the next run resumes the batch at this dataset.
fn ensure_fully_migrated(
    dataset: &DatasetDescriptor,
    working_set: &WorkingSet,
    migration: DatasetMigration,
) -> AppResult<()> {
    match migration.unverified() {
        0 => Ok(()),
        unverified => Err(AppError::Conflict(format!(
            "{unverified} rows of dataset '{}' in batch {} have no verified archive copy and were left in place",
            dataset.source_name(),
            working_set.batch_id
        ))),
    }
}
