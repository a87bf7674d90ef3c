use sunset_domain::DatasetDescriptor;

/// Predicate selecting rows of `source` (aliased `s`) owned by the entity ids bound to `$1`.
pub(super) fn matches_working_set(dataset: &DatasetDescriptor) -> String {
    let join_key = dataset.join_key().quoted();
    match dataset.via() {
        None => format!("s.{join_key} = ANY($1)"),
        Some(via) => format!(
            "s.{join_key} IN (SELECT p.{key} FROM {parent} p WHERE p.{parent_join_key} = ANY($1))",
            key = via.key().quoted(),
            parent = via.dataset().quoted(),
            parent_join_key = via.join_key().quoted(),
        ),
    }
}

/// Archive rows are compared to source rows column for column through their text form.
fn verified_archive_copy(dataset: &DatasetDescriptor) -> String {
    format!(
        "SELECT 1 FROM {archive} a WHERE a.{join_key} IS NOT DISTINCT FROM s.{join_key} AND a::TEXT = s::TEXT",
        archive = dataset.archive_destination().quoted(),
        join_key = dataset.join_key().quoted(),
    )
}

pub(super) fn probe(dataset: &DatasetDescriptor) -> String {
    format!(
        "SELECT EXISTS (SELECT 1 FROM {source} s WHERE {predicate})",
        source = dataset.source_name().quoted(),
        predicate = matches_working_set(dataset),
    )
}

pub(super) fn archive(dataset: &DatasetDescriptor) -> String {
    format!(
        "INSERT INTO {archive} SELECT s.* FROM {source} s WHERE {predicate} AND NOT EXISTS ({verified})",
        archive = dataset.archive_destination().quoted(),
        source = dataset.source_name().quoted(),
        predicate = matches_working_set(dataset),
        verified = verified_archive_copy(dataset),
    )
}

pub(super) fn delete_archived(dataset: &DatasetDescriptor) -> String {
    format!(
        "DELETE FROM {source} s WHERE {predicate} AND EXISTS ({verified})",
        source = dataset.source_name().quoted(),
        predicate = matches_working_set(dataset),
        verified = verified_archive_copy(dataset),
    )
}

pub(super) fn count_matching(dataset: &DatasetDescriptor) -> String {
    format!(
        "SELECT COUNT(*) FROM {source} s WHERE {predicate}",
        source = dataset.source_name().quoted(),
        predicate = matches_working_set(dataset),
    )
}

#[cfg(test)]
mod tests {
    use sunset_domain::{DatasetDescriptor, ParentLink, SqlIdentifier};

    use super::{archive, delete_archived, probe};

    fn ident(value: &str) -> SqlIdentifier {
        SqlIdentifier::new(value).unwrap_or_else(|_| unreachable!())
    }

    fn habits() -> DatasetDescriptor {
        DatasetDescriptor::new(ident("habits"), ident("habits_archive"), ident("user_id"))
            .unwrap_or_else(|_| unreachable!())
    }

    #[test]
    fn probe_joins_directly_on_entity_ids() {
        assert_eq!(
            probe(&habits()),
            "SELECT EXISTS (SELECT 1 FROM \"habits\" s WHERE s.\"user_id\" = ANY($1))"
        );
    }

    #[test]
    fn parent_link_routes_through_parent_dataset() {
        let logs = DatasetDescriptor::new(
            ident("habit_logs"),
            ident("archive.habit_logs"),
            ident("habit_id"),
        )
        .and_then(|dataset| {
            dataset.with_parent(ParentLink::new(ident("habits"), ident("id"), ident("user_id")))
        })
        .unwrap_or_else(|_| unreachable!());

        let statement = archive(&logs);
        assert!(statement.starts_with("INSERT INTO \"archive\".\"habit_logs\" SELECT s.*"));
        assert!(statement.contains(
            "s.\"habit_id\" IN (SELECT p.\"id\" FROM \"habits\" p WHERE p.\"user_id\" = ANY($1))"
        ));
    }

    #[test]
    fn delete_requires_verified_archive_copy() {
        let statement = delete_archived(&habits());
        assert!(statement.starts_with("DELETE FROM \"habits\" s WHERE"));
        assert!(statement.contains("AND EXISTS (SELECT 1 FROM \"habits_archive\" a"));
        assert!(statement.contains("a::TEXT = s::TEXT"));
    }
}
