use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sunset_core::{AppError, AppResult};

use crate::SqlIdentifier;

/// Single-hop link for datasets that reference the root entity through a parent table.
///
/// A row matches an entity when `row.<join_key>` equals `parent.<key>` for a
/// parent row whose `<parent_join_key>` is the entity id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentLink {
    dataset: SqlIdentifier,
    key: SqlIdentifier,
    join_key: SqlIdentifier,
}

impl ParentLink {
    /// Creates a parent link.
    #[must_use]
    pub fn new(dataset: SqlIdentifier, key: SqlIdentifier, join_key: SqlIdentifier) -> Self {
        Self {
            dataset,
            key,
            join_key,
        }
    }

    /// Returns the parent dataset name.
    #[must_use]
    pub fn dataset(&self) -> &SqlIdentifier {
        &self.dataset
    }

    /// Returns the parent column referenced by the child's join key.
    #[must_use]
    pub fn key(&self) -> &SqlIdentifier {
        &self.key
    }

    /// Returns the parent column holding the root entity id.
    #[must_use]
    pub fn join_key(&self) -> &SqlIdentifier {
        &self.join_key
    }
}

/// One dataset whose rows are archived then purged for retired entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    source_name: SqlIdentifier,
    archive_destination: SqlIdentifier,
    join_key: SqlIdentifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    via: Option<ParentLink>,
}

impl DatasetDescriptor {
    /// Creates a descriptor whose join key holds the root entity id directly.
    pub fn new(
        source_name: SqlIdentifier,
        archive_destination: SqlIdentifier,
        join_key: SqlIdentifier,
    ) -> AppResult<Self> {
        let descriptor = Self {
            source_name,
            archive_destination,
            join_key,
            via: None,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Routes entity matching through a parent dataset.
    pub fn with_parent(mut self, via: ParentLink) -> AppResult<Self> {
        self.via = Some(via);
        self.validate()?;
        Ok(self)
    }

    /// Returns the source dataset name.
    #[must_use]
    pub fn source_name(&self) -> &SqlIdentifier {
        &self.source_name
    }

    /// Returns the archive destination name.
    #[must_use]
    pub fn archive_destination(&self) -> &SqlIdentifier {
        &self.archive_destination
    }

    /// Returns the column linking rows to the root entity (or to the parent).
    #[must_use]
    pub fn join_key(&self) -> &SqlIdentifier {
        &self.join_key
    }

    /// Returns the parent link, if rows reference the root entity indirectly.
    #[must_use]
    pub fn via(&self) -> Option<&ParentLink> {
        self.via.as_ref()
    }

    fn validate(&self) -> AppResult<()> {
        if self.source_name == self.archive_destination {
            return Err(AppError::Validation(format!(
                "dataset '{}' cannot archive into itself",
                self.source_name
            )));
        }

        if let Some(via) = &self.via
            && (via.dataset == self.source_name || via.dataset == self.archive_destination)
        {
            return Err(AppError::Validation(format!(
                "dataset '{}' cannot use itself as parent link",
                self.source_name
            )));
        }

        Ok(())
    }
}

/// Ordered catalog of datasets: dependents first, root-entity dataset last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetCatalog {
    dependents: Vec<DatasetDescriptor>,
    root: DatasetDescriptor,
}

impl DatasetCatalog {
    /// Creates a validated catalog.
    pub fn new(dependents: Vec<DatasetDescriptor>, root: DatasetDescriptor) -> AppResult<Self> {
        // Descriptors built through serde skip the constructor checks.
        for descriptor in dependents.iter().chain(std::iter::once(&root)) {
            descriptor.validate()?;
        }

        if root.via.is_some() {
            return Err(AppError::Validation(format!(
                "root dataset '{}' must reference entities directly",
                root.source_name
            )));
        }

        let ordered: Vec<&DatasetDescriptor> =
            dependents.iter().chain(std::iter::once(&root)).collect();
        let mut seen_sources = HashSet::new();
        let mut seen_archives = HashSet::new();

        for descriptor in &ordered {
            if !seen_sources.insert(descriptor.source_name.as_str()) {
                return Err(AppError::Validation(format!(
                    "dataset '{}' is listed more than once",
                    descriptor.source_name
                )));
            }

            if !seen_archives.insert(descriptor.archive_destination.as_str()) {
                return Err(AppError::Validation(format!(
                    "archive destination '{}' is shared by several datasets",
                    descriptor.archive_destination
                )));
            }
        }

        for (position, descriptor) in ordered.iter().enumerate() {
            if ordered
                .iter()
                .any(|other| other.archive_destination == descriptor.source_name)
            {
                return Err(AppError::Validation(format!(
                    "dataset '{}' is also used as an archive destination",
                    descriptor.source_name
                )));
            }

            let Some(via) = &descriptor.via else {
                continue;
            };

            let parent_runs_first = ordered[..position]
                .iter()
                .any(|earlier| earlier.source_name == via.dataset);
            if parent_runs_first {
                return Err(AppError::Validation(format!(
                    "dataset '{}' must be listed before its parent '{}'",
                    descriptor.source_name, via.dataset
                )));
            }
        }

        Ok(Self { dependents, root })
    }

    /// Returns the dependent datasets in processing order.
    #[must_use]
    pub fn dependents(&self) -> &[DatasetDescriptor] {
        self.dependents.as_slice()
    }

    /// Returns the root-entity dataset, processed after every dependent.
    #[must_use]
    pub fn root(&self) -> &DatasetDescriptor {
        &self.root
    }

    /// Iterates every dataset in processing order.
    pub fn ordered(&self) -> impl Iterator<Item = &DatasetDescriptor> {
        self.dependents.iter().chain(std::iter::once(&self.root))
    }

    /// Returns the number of datasets including the root.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dependents.len() + 1
    }

    /// A catalog always contains at least the root dataset.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::{DatasetCatalog, DatasetDescriptor, ParentLink};
    use crate::SqlIdentifier;

    fn ident(value: &str) -> SqlIdentifier {
        SqlIdentifier::new(value).unwrap_or_else(|_| unreachable!())
    }

    fn descriptor(source: &str, join_key: &str) -> DatasetDescriptor {
        DatasetDescriptor::new(
            ident(source),
            ident(format!("{source}_archive").as_str()),
            ident(join_key),
        )
        .unwrap_or_else(|_| unreachable!())
    }

    #[test]
    fn ordered_yields_dependents_then_root() {
        let catalog = DatasetCatalog::new(
            vec![descriptor("habits", "user_id"), descriptor("reminders", "user_id")],
            descriptor("users", "id"),
        );
        assert!(catalog.is_ok());
        let catalog = catalog.unwrap_or_else(|_| unreachable!());

        let names: Vec<&str> = catalog
            .ordered()
            .map(|dataset| dataset.source_name().as_str())
            .collect();
        assert_eq!(names, vec!["habits", "reminders", "users"]);
        assert_eq!(catalog.len(), 3);
    }

    #[test]
    fn duplicate_sources_are_rejected() {
        let catalog = DatasetCatalog::new(
            vec![descriptor("habits", "user_id"), descriptor("habits", "owner_id")],
            descriptor("users", "id"),
        );
        assert!(catalog.is_err());
    }

    #[test]
    fn archiving_into_itself_is_rejected() {
        let descriptor = DatasetDescriptor::new(ident("habits"), ident("habits"), ident("user_id"));
        assert!(descriptor.is_err());
    }

    #[test]
    fn child_must_precede_its_parent() {
        let logs = descriptor("habit_logs", "habit_id")
            .with_parent(ParentLink::new(ident("habits"), ident("id"), ident("user_id")))
            .unwrap_or_else(|_| unreachable!());

        let misordered = DatasetCatalog::new(
            vec![descriptor("habits", "user_id"), logs.clone()],
            descriptor("users", "id"),
        );
        assert!(misordered.is_err());

        let ordered = DatasetCatalog::new(
            vec![logs, descriptor("habits", "user_id")],
            descriptor("users", "id"),
        );
        assert!(ordered.is_ok());
    }

    #[test]
    fn root_with_parent_link_is_rejected() {
        let root = descriptor("users", "id")
            .with_parent(ParentLink::new(ident("accounts"), ident("id"), ident("owner_id")))
            .unwrap_or_else(|_| unreachable!());
        assert!(DatasetCatalog::new(Vec::new(), root).is_err());
    }

    #[test]
    fn source_reused_as_archive_is_rejected() {
        let habits = DatasetDescriptor::new(ident("habits"), ident("users"), ident("user_id"))
            .unwrap_or_else(|_| unreachable!());
        assert!(DatasetCatalog::new(vec![habits], descriptor("users", "id")).is_err());
    }
}
