//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod audit;
mod candidate;
mod dataset;
mod eligibility;
mod identifier;

pub use audit::{AuditEntry, NO_DATASET, RunPhase};
pub use candidate::{BatchId, Candidate, CandidateId, CandidateStatus, EntityId, HELD_NOTE};
pub use dataset::{DatasetCatalog, DatasetDescriptor, ParentLink};
pub use eligibility::{
    DisqualificationRule, EligibilityDecision, EligibilityPolicy, EligibilityProfile,
    ProfileSource,
};
pub use identifier::SqlIdentifier;
