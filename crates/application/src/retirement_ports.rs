mod audit;
mod candidates;
mod datasets;

pub use audit::AuditRepository;
pub use candidates::{BatchAllocation, CandidateRepository, WorkingSet};
pub use datasets::{DatasetMigrationRepository, DatasetTransaction};
