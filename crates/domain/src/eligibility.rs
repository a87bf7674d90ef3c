use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sunset_core::{AppError, AppResult, NonEmptyString};

use crate::{CandidateId, EntityId, SqlIdentifier};

/// Relationship that excludes a candidate from retirement.
///
/// A candidate matches when `dataset` holds a row whose `join_key` is the
/// candidate's entity id and, if `status_column` is set, whose status is one of
/// `status_values`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisqualificationRule {
    name: NonEmptyString,
    dataset: SqlIdentifier,
    join_key: SqlIdentifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status_column: Option<SqlIdentifier>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    status_values: Vec<String>,
}

impl DisqualificationRule {
    /// Creates a rule matching any linked row.
    pub fn new(
        name: impl Into<String>,
        dataset: SqlIdentifier,
        join_key: SqlIdentifier,
    ) -> AppResult<Self> {
        Ok(Self {
            name: NonEmptyString::new(name)?,
            dataset,
            join_key,
            status_column: None,
            status_values: Vec::new(),
        })
    }

    /// Restricts the rule to linked rows in one of the given states.
    pub fn with_status_filter(
        mut self,
        status_column: SqlIdentifier,
        status_values: Vec<String>,
    ) -> AppResult<Self> {
        self.status_column = Some(status_column);
        self.status_values = status_values;
        self.validate()?;
        Ok(self)
    }

    /// Returns the rule name used in cancellation reasons.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the linked dataset.
    #[must_use]
    pub fn dataset(&self) -> &SqlIdentifier {
        &self.dataset
    }

    /// Returns the column holding the entity id.
    #[must_use]
    pub fn join_key(&self) -> &SqlIdentifier {
        &self.join_key
    }

    /// Returns the optional status column.
    #[must_use]
    pub fn status_column(&self) -> Option<&SqlIdentifier> {
        self.status_column.as_ref()
    }

    /// Returns the status values that make a linked row disqualifying.
    #[must_use]
    pub fn status_values(&self) -> &[String] {
        self.status_values.as_slice()
    }

    /// Returns whether a linked row with `status` matches this rule.
    #[must_use]
    pub fn matches_status(&self, status: Option<&str>) -> bool {
        if self.status_column.is_none() {
            return true;
        }

        status.is_some_and(|status| self.status_values.iter().any(|value| value == status))
    }

    fn validate(&self) -> AppResult<()> {
        if self.status_column.is_some() && self.status_values.is_empty() {
            return Err(AppError::Validation(format!(
                "disqualification rule '{}' has a status column but no status values",
                self.name.as_str()
            )));
        }

        Ok(())
    }
}

/// Columns of the root dataset read to build eligibility profiles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSource {
    dataset: SqlIdentifier,
    key_column: SqlIdentifier,
    role_column: SqlIdentifier,
    last_active_column: SqlIdentifier,
}

impl ProfileSource {
    /// Creates a profile source.
    #[must_use]
    pub fn new(
        dataset: SqlIdentifier,
        key_column: SqlIdentifier,
        role_column: SqlIdentifier,
        last_active_column: SqlIdentifier,
    ) -> Self {
        Self {
            dataset,
            key_column,
            role_column,
            last_active_column,
        }
    }

    /// Returns the dataset holding root entity rows.
    #[must_use]
    pub fn dataset(&self) -> &SqlIdentifier {
        &self.dataset
    }

    /// Returns the entity id column.
    #[must_use]
    pub fn key_column(&self) -> &SqlIdentifier {
        &self.key_column
    }

    /// Returns the role/category column.
    #[must_use]
    pub fn role_column(&self) -> &SqlIdentifier {
        &self.role_column
    }

    /// Returns the last activity timestamp column.
    #[must_use]
    pub fn last_active_column(&self) -> &SqlIdentifier {
        &self.last_active_column
    }
}

/// Facts about one pending candidate gathered for its eligibility decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityProfile {
    /// Candidate being evaluated.
    pub candidate_id: CandidateId,
    /// Root entity of the candidate.
    pub entity_id: EntityId,
    /// Role or category of the root entity, when the row exists.
    pub role: Option<String>,
    /// Last recorded activity, `None` when the entity never was active.
    pub last_active_at: Option<DateTime<Utc>>,
    /// Names of disqualification rules with at least one matching row.
    pub matched_rules: Vec<String>,
}

/// Outcome of evaluating one pending candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EligibilityDecision {
    /// Exclude the candidate permanently.
    Cancel {
        /// Reason naming the matched rule.
        reason: String,
    },
    /// Promote the candidate into the working set.
    Promote,
    /// Neither predicate matched; the candidate stays pending.
    Hold,
}

/// Disqualification and promotion predicates applied to pending candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityPolicy {
    dormancy_threshold_days: u32,
    promotable_roles: Vec<String>,
    rules: Vec<DisqualificationRule>,
    profile_source: ProfileSource,
}

impl EligibilityPolicy {
    /// Creates a validated policy. An empty role list promotes every role.
    pub fn new(
        dormancy_threshold_days: u32,
        promotable_roles: Vec<String>,
        rules: Vec<DisqualificationRule>,
        profile_source: ProfileSource,
    ) -> AppResult<Self> {
        if dormancy_threshold_days == 0 {
            return Err(AppError::Validation(
                "dormancy threshold must be at least one day".to_owned(),
            ));
        }

        for rule in &rules {
            rule.validate()?;
        }

        let mut names: Vec<&str> = rules.iter().map(DisqualificationRule::name).collect();
        names.sort_unstable();
        if let Some(duplicate) = names.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(AppError::Validation(format!(
                "disqualification rule '{}' is defined more than once",
                duplicate[0]
            )));
        }

        let promotable_roles = promotable_roles
            .into_iter()
            .map(|role| role.trim().to_lowercase())
            .filter(|role| !role.is_empty())
            .collect();

        Ok(Self {
            dormancy_threshold_days,
            promotable_roles,
            rules,
            profile_source,
        })
    }

    /// Returns the dormancy threshold in days.
    #[must_use]
    pub fn dormancy_threshold_days(&self) -> u32 {
        self.dormancy_threshold_days
    }

    /// Returns the normalized promotable roles.
    #[must_use]
    pub fn promotable_roles(&self) -> &[String] {
        self.promotable_roles.as_slice()
    }

    /// Returns the disqualification rules in evaluation order.
    #[must_use]
    pub fn rules(&self) -> &[DisqualificationRule] {
        self.rules.as_slice()
    }

    /// Returns the root dataset columns used for profiles.
    #[must_use]
    pub fn profile_source(&self) -> &ProfileSource {
        &self.profile_source
    }

    /// Decides the fate of one pending candidate. Disqualifiers are checked first.
    #[must_use]
    pub fn evaluate(
        &self,
        profile: &EligibilityProfile,
        now: DateTime<Utc>,
    ) -> EligibilityDecision {
        if let Some(rule) = self.rules.iter().find(|rule| {
            profile
                .matched_rules
                .iter()
                .any(|matched| matched == rule.name())
        }) {
            return EligibilityDecision::Cancel {
                reason: format!("disqualified: {}", rule.name()),
            };
        }

        if self.is_dormant(profile.last_active_at, now)
            && self.role_matches(profile.role.as_deref())
        {
            return EligibilityDecision::Promote;
        }

        EligibilityDecision::Hold
    }

    fn is_dormant(&self, last_active_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_active_at {
            None => true,
            Some(last_active_at) => {
                now.signed_duration_since(last_active_at)
                    >= Duration::days(i64::from(self.dormancy_threshold_days))
            }
        }
    }

    fn role_matches(&self, role: Option<&str>) -> bool {
        if self.promotable_roles.is_empty() {
            return true;
        }

        role.is_some_and(|role| {
            let role = role.trim().to_lowercase();
            self.promotable_roles.iter().any(|allowed| *allowed == role)
        })
    }
}
