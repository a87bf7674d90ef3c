//! Application services and ports.

#![forbid(unsafe_code)]

mod retirement_ports;
mod retirement_service;

pub use retirement_ports::{
    AuditRepository, BatchAllocation, CandidateRepository, DatasetMigrationRepository,
    DatasetTransaction, WorkingSet,
};
pub use retirement_service::{DatasetMigration, RetirementService, RunReport};
