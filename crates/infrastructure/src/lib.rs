//! Infrastructure adapters for retirement ports.

#![forbid(unsafe_code)]

mod in_memory_retirement_store;
mod postgres_audit_repository;
mod postgres_candidate_repository;
mod postgres_dataset_migration_repository;

#[cfg(test)]
mod postgres_test_support;

pub use in_memory_retirement_store::{InMemoryRetirementStore, Row};
pub use postgres_audit_repository::PostgresAuditRepository;
pub use postgres_candidate_repository::PostgresCandidateRepository;
pub use postgres_dataset_migration_repository::PostgresDatasetMigrationRepository;
