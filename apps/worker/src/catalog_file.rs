use std::path::Path;

use serde::Deserialize;
use sunset_core::{AppError, AppResult};
use sunset_domain::{
    DatasetCatalog, DatasetDescriptor, DisqualificationRule, EligibilityPolicy, ParentLink,
    ProfileSource, SqlIdentifier,
};

/// Deployment catalog as stored on disk.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogFile {
    datasets: Vec<DatasetEntry>,
    root: DatasetEntry,
    eligibility: EligibilityEntry,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DatasetEntry {
    source_name: String,
    archive_destination: String,
    join_key: String,
    #[serde(default)]
    via: Option<ParentLinkEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ParentLinkEntry {
    dataset: String,
    key: String,
    join_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EligibilityEntry {
    profile: ProfileEntry,
    #[serde(default)]
    rules: Vec<RuleEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProfileEntry {
    dataset: String,
    key_column: String,
    role_column: String,
    last_active_column: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleEntry {
    name: String,
    dataset: String,
    join_key: String,
    #[serde(default)]
    status_column: Option<String>,
    #[serde(default)]
    status_values: Vec<String>,
}

impl CatalogFile {
    /// Reads and parses a catalog file.
    pub fn load(path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|error| {
            AppError::Validation(format!(
                "failed to read retirement catalog '{}': {error}",
                path.display()
            ))
        })?;

        Self::parse(contents.as_str()).map_err(|error| match error {
            AppError::Validation(message) => {
                AppError::Validation(format!("{}: {message}", path.display()))
            }
            other => other,
        })
    }

    /// Parses catalog JSON.
    pub fn parse(contents: &str) -> AppResult<Self> {
        serde_json::from_str(contents).map_err(|error| {
            AppError::Validation(format!("invalid retirement catalog: {error}"))
        })
    }

    /// Builds the validated, ordered dataset catalog.
    pub fn dataset_catalog(&self) -> AppResult<DatasetCatalog> {
        let dependents = self
            .datasets
            .iter()
            .map(DatasetEntry::to_descriptor)
            .collect::<AppResult<Vec<_>>>()?;

        DatasetCatalog::new(dependents, self.root.to_descriptor()?)
    }

    /// Builds the eligibility policy with the deployment's predicates.
    pub fn eligibility_policy(
        &self,
        dormancy_threshold_days: u32,
        promotable_roles: Vec<String>,
    ) -> AppResult<EligibilityPolicy> {
        let rules = self
            .eligibility
            .rules
            .iter()
            .map(RuleEntry::to_rule)
            .collect::<AppResult<Vec<_>>>()?;
        let profile = &self.eligibility.profile;

        EligibilityPolicy::new(
            dormancy_threshold_days,
            promotable_roles,
            rules,
            ProfileSource::new(
                SqlIdentifier::new(profile.dataset.as_str())?,
                SqlIdentifier::new(profile.key_column.as_str())?,
                SqlIdentifier::new(profile.role_column.as_str())?,
                SqlIdentifier::new(profile.last_active_column.as_str())?,
            ),
        )
    }
}

impl DatasetEntry {
    fn to_descriptor(&self) -> AppResult<DatasetDescriptor> {
        let descriptor = DatasetDescriptor::new(
            SqlIdentifier::new(self.source_name.as_str())?,
            SqlIdentifier::new(self.archive_destination.as_str())?,
            SqlIdentifier::new(self.join_key.as_str())?,
        )?;

        match &self.via {
            None => Ok(descriptor),
            Some(via) => descriptor.with_parent(ParentLink::new(
                SqlIdentifier::new(via.dataset.as_str())?,
                SqlIdentifier::new(via.key.as_str())?,
                SqlIdentifier::new(via.join_key.as_str())?,
            )),
        }
    }
}

impl RuleEntry {
    fn to_rule(&self) -> AppResult<DisqualificationRule> {
        let rule = DisqualificationRule::new(
            self.name.as_str(),
            SqlIdentifier::new(self.dataset.as_str())?,
            SqlIdentifier::new(self.join_key.as_str())?,
        )?;

        match &self.status_column {
            None if self.status_values.is_empty() => Ok(rule),
            None => Err(AppError::Validation(format!(
                "disqualification rule '{}' lists status values without a status column",
                self.name
            ))),
            Some(column) => rule.with_status_filter(
                SqlIdentifier::new(column.as_str())?,
                self.status_values.clone(),
            ),
        }
    }
}
