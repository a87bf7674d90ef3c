use std::sync::Arc;

use chrono::Utc;
use sunset_core::{ActorIdentity, AppError, AppResult};
use sunset_domain::{
    AuditEntry, BatchId, CandidateId, DatasetCatalog, DatasetDescriptor, EligibilityDecision,
    EligibilityPolicy, HELD_NOTE, RunPhase,
};
use tracing::{debug, error, info, warn};

use crate::retirement_ports::{
    AuditRepository, CandidateRepository, DatasetMigrationRepository, DatasetTransaction,
    WorkingSet,
};

mod eligibility;
mod executor;
mod report;
mod run;

pub use executor::DatasetMigration;
pub use report::RunReport;

/// Batch engine that retires dormant accounts with every dependent row.
///
/// One run allocates and evaluates batches, migrates each batch's working set
/// through the dataset catalog in order, and stops at the first error after
/// recording it. Recovery is a fresh invocation: committed datasets are
/// skipped, unfinished candidates stay in progress, and a batch whose
/// evaluation was interrupted is evaluated again.
#[derive(Clone)]
pub struct RetirementService {
    candidate_repository: Arc<dyn CandidateRepository>,
    dataset_repository: Arc<dyn DatasetMigrationRepository>,
    audit_repository: Arc<dyn AuditRepository>,
    catalog: DatasetCatalog,
    policy: EligibilityPolicy,
    actor: ActorIdentity,
}

impl RetirementService {
    /// Creates a retirement service.
    #[must_use]
    pub fn new(
        candidate_repository: Arc<dyn CandidateRepository>,
        dataset_repository: Arc<dyn DatasetMigrationRepository>,
        audit_repository: Arc<dyn AuditRepository>,
        catalog: DatasetCatalog,
        policy: EligibilityPolicy,
        actor: ActorIdentity,
    ) -> Self {
        Self {
            candidate_repository,
            dataset_repository,
            audit_repository,
            catalog,
            policy,
            actor,
        }
    }
}
