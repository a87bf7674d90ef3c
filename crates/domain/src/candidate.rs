use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sunset_core::{AppError, AppResult};

/// Note recorded on pending candidates that matched neither eligibility predicate.
pub const HELD_NOTE: &str = "held: matched neither disqualification nor promotion";

/// Identifier of one retirement candidate row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CandidateId(i64);

impl CandidateId {
    /// Creates a candidate identifier from its stored value.
    #[must_use]
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the stored value.
    #[must_use]
    pub fn value(self) -> i64 {
        self.0
    }
}

impl Display for CandidateId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Identifier of the root entity (user account) a candidate retires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(i64);

impl EntityId {
    /// Creates an entity identifier from its stored value.
    #[must_use]
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the stored value.
    #[must_use]
    pub fn value(self) -> i64 {
        self.0
    }
}

impl Display for EntityId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Monotonic identifier of one candidate cohort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchId(i64);

impl BatchId {
    /// First identifier handed out when no batch exists yet.
    pub const FIRST: Self = Self(1);

    /// Creates a batch identifier, rejecting non-positive values.
    pub fn new(value: i64) -> AppResult<Self> {
        if value < 1 {
            return Err(AppError::Validation(format!(
                "batch id must be positive, got {value}"
            )));
        }

        Ok(Self(value))
    }

    /// Returns the identifier following the current highest one.
    #[must_use]
    pub fn next_after(current_max: Option<Self>) -> Self {
        match current_max {
            Some(current) => Self(current.0.saturating_add(1)),
            None => Self::FIRST,
        }
    }

    /// Returns the stored value.
    #[must_use]
    pub fn value(self) -> i64 {
        self.0
    }
}

impl Display for BatchId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Lifecycle state of a retirement candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    /// Queued and waiting for an eligibility decision.
    Pending,
    /// Promoted; its rows are being archived and removed.
    InProgress,
    /// Excluded by a disqualifying rule. Terminal.
    Canceled,
    /// Every dataset has been migrated. Terminal.
    Completed,
}

impl CandidateStatus {
    /// Returns a stable storage value for this status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Canceled => "canceled",
            Self::Completed => "completed",
        }
    }

    /// Returns whether no further transition is allowed.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Canceled | Self::Completed)
    }

    /// Returns whether moving from `self` to `next` is one of the allowed edges.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::Pending, Self::Canceled)
                | (Self::InProgress, Self::Completed)
        )
    }
}

impl FromStr for CandidateStatus {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "canceled" => Ok(Self::Canceled),
            "completed" => Ok(Self::Completed),
            _ => Err(AppError::Validation(format!(
                "unknown candidate status '{value}'"
            ))),
        }
    }
}

/// One root entity queued for retirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    candidate_id: CandidateId,
    entity_id: EntityId,
    batch_id: Option<BatchId>,
    status: CandidateStatus,
    note: Option<String>,
}

impl Candidate {
    /// Creates a freshly seeded pending candidate.
    #[must_use]
    pub fn pending(candidate_id: CandidateId, entity_id: EntityId) -> Self {
        Self {
            candidate_id,
            entity_id,
            batch_id: None,
            status: CandidateStatus::Pending,
            note: None,
        }
    }

    /// Rebuilds a candidate from persisted state.
    #[must_use]
    pub fn restore(
        candidate_id: CandidateId,
        entity_id: EntityId,
        batch_id: Option<BatchId>,
        status: CandidateStatus,
        note: Option<String>,
    ) -> Self {
        Self {
            candidate_id,
            entity_id,
            batch_id,
            status,
            note,
        }
    }

    /// Returns the candidate identifier.
    #[must_use]
    pub fn candidate_id(&self) -> CandidateId {
        self.candidate_id
    }

    /// Returns the root entity identifier.
    #[must_use]
    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    /// Returns the assigned batch, if any.
    #[must_use]
    pub fn batch_id(&self) -> Option<BatchId> {
        self.batch_id
    }

    /// Returns the lifecycle status.
    #[must_use]
    pub fn status(&self) -> CandidateStatus {
        self.status
    }

    /// Returns the reason text recorded with the last transition.
    #[must_use]
    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    /// Returns whether the candidate sits in a batch without an eligibility decision yet.
    #[must_use]
    pub fn awaits_evaluation(&self) -> bool {
        self.status == CandidateStatus::Pending && self.batch_id.is_some() && self.note.is_none()
    }

    /// Records that evaluation left the candidate pending. The status does not change.
    pub fn hold(&mut self, note: impl Into<String>) -> AppResult<()> {
        if !self.awaits_evaluation() {
            return Err(AppError::Conflict(format!(
                "candidate {} is not awaiting evaluation and cannot be held",
                self.candidate_id
            )));
        }

        self.note = Some(note.into());
        Ok(())
    }

    /// Assigns the candidate to a batch. A batch id never changes once set.
    pub fn assign_batch(&mut self, batch_id: BatchId) -> AppResult<()> {
        if self.status != CandidateStatus::Pending {
            return Err(AppError::Conflict(format!(
                "candidate {} is {} and cannot join batch {batch_id}",
                self.candidate_id,
                self.status.as_str()
            )));
        }

        match self.batch_id {
            None => {
                self.batch_id = Some(batch_id);
                Ok(())
            }
            Some(current) => Err(AppError::Conflict(format!(
                "candidate {} already belongs to batch {current}",
                self.candidate_id
            ))),
        }
    }

    /// Moves the candidate along one allowed edge of the lifecycle.
    pub fn transition_to(&mut self, next: CandidateStatus, note: Option<String>) -> AppResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::Conflict(format!(
                "candidate {} cannot move from {} to {}",
                self.candidate_id,
                self.status.as_str(),
                next.as_str()
            )));
        }

        self.status = next;
        if note.is_some() {
            self.note = note;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use proptest::prelude::*;

    use super::{BatchId, Candidate, CandidateId, CandidateStatus, EntityId, HELD_NOTE};

    fn any_status() -> impl Strategy<Value = CandidateStatus> {
        prop_oneof![
            Just(CandidateStatus::Pending),
            Just(CandidateStatus::InProgress),
            Just(CandidateStatus::Canceled),
            Just(CandidateStatus::Completed),
        ]
    }

    #[test]
    fn status_roundtrip_storage_value() {
        for status in [
            CandidateStatus::Pending,
            CandidateStatus::InProgress,
            CandidateStatus::Canceled,
            CandidateStatus::Completed,
        ] {
            let restored = CandidateStatus::from_str(status.as_str());
            assert!(restored.is_ok());
            assert_eq!(restored.unwrap_or(CandidateStatus::Pending), status);
        }

        assert!(CandidateStatus::from_str("archived").is_err());
    }

    #[test]
    fn batch_ids_start_at_one_and_increase() {
        assert_eq!(BatchId::next_after(None), BatchId::FIRST);
        let third = BatchId::new(3).unwrap_or(BatchId::FIRST);
        assert_eq!(BatchId::next_after(Some(third)).value(), 4);
        assert!(BatchId::new(0).is_err());
    }

    #[test]
    fn batch_assignment_is_immutable() {
        let mut candidate = Candidate::pending(CandidateId::new(1), EntityId::new(10));
        assert!(candidate.assign_batch(BatchId::FIRST).is_ok());

        let second = BatchId::next_after(Some(BatchId::FIRST));
        assert!(candidate.assign_batch(second).is_err());
        assert_eq!(candidate.batch_id(), Some(BatchId::FIRST));
    }

    #[test]
    fn cancel_records_reason() {
        let mut candidate = Candidate::pending(CandidateId::new(1), EntityId::new(10));
        let result = candidate.transition_to(
            CandidateStatus::Canceled,
            Some("disqualified: linked_bank_account".to_owned()),
        );

        assert!(result.is_ok());
        assert_eq!(candidate.status(), CandidateStatus::Canceled);
        assert_eq!(candidate.note(), Some("disqualified: linked_bank_account"));
    }

    #[test]
    fn held_candidate_stays_pending_and_is_no_longer_awaiting_evaluation() {
        let mut candidate = Candidate::pending(CandidateId::new(1), EntityId::new(10));
        assert!(!candidate.awaits_evaluation());
        assert!(candidate.hold(HELD_NOTE).is_err());

        assert!(candidate.assign_batch(BatchId::FIRST).is_ok());
        assert!(candidate.awaits_evaluation());
        assert!(candidate.hold(HELD_NOTE).is_ok());

        assert_eq!(candidate.status(), CandidateStatus::Pending);
        assert_eq!(candidate.note(), Some(HELD_NOTE));
        assert!(!candidate.awaits_evaluation());
        assert!(candidate.hold(HELD_NOTE).is_err());
        assert!(candidate.transition_to(CandidateStatus::InProgress, None).is_ok());
    }

    proptest! {
        #[test]
        fn only_forward_edges_are_accepted(from in any_status(), to in any_status()) {
            let allowed = matches!(
                (from, to),
                (CandidateStatus::Pending, CandidateStatus::InProgress)
                    | (CandidateStatus::Pending, CandidateStatus::Canceled)
                    | (CandidateStatus::InProgress, CandidateStatus::Completed)
            );
            prop_assert_eq!(from.can_transition_to(to), allowed);

            let mut candidate = Candidate::restore(
                CandidateId::new(1),
                EntityId::new(1),
                Some(BatchId::FIRST),
                from,
                None,
            );
            let result = candidate.transition_to(to, None);
            prop_assert_eq!(result.is_ok(), allowed);
            prop_assert_eq!(candidate.status(), if allowed { to } else { from });
        }

        #[test]
        fn terminal_states_never_move(steps in proptest::collection::vec(any_status(), 1..12)) {
            let mut candidate = Candidate::pending(CandidateId::new(1), EntityId::new(1));
            let mut reached_terminal = None;

            for next in steps {
                let _ = candidate.transition_to(next, None);
                if let Some(terminal) = reached_terminal {
                    prop_assert_eq!(candidate.status(), terminal);
                }
                if candidate.status().is_terminal() {
                    reached_terminal = Some(candidate.status());
                }
            }
        }
    }
}
