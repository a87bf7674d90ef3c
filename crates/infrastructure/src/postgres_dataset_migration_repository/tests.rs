use chrono::Utc;
use sqlx::PgPool;
use sunset_application::{DatasetMigrationRepository, WorkingSet};
use sunset_core::ActorIdentity;
use sunset_domain::{
    AuditEntry, BatchId, CandidateId, DatasetDescriptor, EntityId, ParentLink, SqlIdentifier,
};

use super::PostgresDatasetMigrationRepository;
use crate::postgres_test_support::{create_habit_tracker_tables, execute, test_pool};

fn ident(value: &str) -> SqlIdentifier {
    SqlIdentifier::new(value).unwrap_or_else(|_| unreachable!())
}

fn habits() -> DatasetDescriptor {
    DatasetDescriptor::new(ident("habits"), ident("habits_archive"), ident("user_id"))
        .unwrap_or_else(|_| unreachable!())
}

fn habit_logs() -> DatasetDescriptor {
    DatasetDescriptor::new(
        ident("habit_logs"),
        ident("habit_logs_archive"),
        ident("habit_id"),
    )
    .and_then(|dataset| {
        dataset.with_parent(ParentLink::new(ident("habits"), ident("id"), ident("user_id")))
    })
    .unwrap_or_else(|_| unreachable!())
}

fn working_set(entity_ids: &[i64]) -> WorkingSet {
    WorkingSet {
        batch_id: BatchId::FIRST,
        candidate_ids: entity_ids.iter().copied().map(CandidateId::new).collect(),
        entity_ids: entity_ids.iter().copied().map(EntityId::new).collect(),
    }
}

fn actor() -> ActorIdentity {
    ActorIdentity::new("svc-retirement").unwrap_or_else(|_| unreachable!())
}

async fn seed_habit_tracker(pool: &PgPool) {
    create_habit_tracker_tables(pool).await;
    execute(
        pool,
        r#"
        INSERT INTO users (id, role, last_login_at) VALUES
            (1, 'member', NULL),
            (2, 'member', NULL);
        INSERT INTO habits (id, user_id, name) VALUES
            (10, 1, 'read'),
            (11, 1, 'run'),
            (20, 2, 'swim');
        INSERT INTO habit_logs (id, habit_id, note) VALUES
            (100, 10, NULL),
            (101, 11, 'morning'),
            (200, 20, 'evening');
        "#,
    )
    .await;
}

async fn count(pool: &PgPool, statement: &str) -> i64 {
    let count = sqlx::query_scalar::<_, i64>(statement)
        .fetch_one(pool)
        .await;
    assert!(count.is_ok());
    count.unwrap_or_default()
}

#[tokio::test]
async fn committed_migration_moves_rows_through_parent_link() {
    let Some(pool) = test_pool().await else {
        return;
    };
    seed_habit_tracker(&pool).await;
    let repository = PostgresDatasetMigrationRepository::new(pool.clone());
    let dataset = habit_logs();
    let working_set = working_set(&[1]);

    assert!(matches!(
        repository.has_matching_rows(&dataset, &working_set).await,
        Ok(true)
    ));

    let transaction = repository.begin_dataset_transaction(&dataset).await;
    assert!(transaction.is_ok());
    let mut transaction = transaction.unwrap_or_else(|_| unreachable!());

    assert!(matches!(
        transaction.archive_matching_rows(&dataset, &working_set).await,
        Ok(2)
    ));
    assert!(
        transaction
            .append_audit_entry(AuditEntry::archived(
                BatchId::FIRST,
                "habit_logs",
                2,
                &actor(),
                Utc::now(),
            ))
            .await
            .is_ok()
    );
    assert!(matches!(
        transaction.delete_archived_rows(&dataset, &working_set).await,
        Ok(2)
    ));
    assert!(matches!(
        transaction.count_matching_rows(&dataset, &working_set).await,
        Ok(0)
    ));
    assert!(transaction.commit().await.is_ok());

    assert_eq!(count(&pool, "SELECT COUNT(*) FROM habit_logs").await, 1);
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM habit_logs_archive WHERE habit_id IN (10, 11)").await,
        2
    );
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM retirement_audit_entries").await,
        1
    );
    assert!(matches!(
        repository.has_matching_rows(&dataset, &working_set).await,
        Ok(false)
    ));
}

#[tokio::test]
async fn rolled_back_migration_leaves_source_archive_and_audit_untouched() {
    let Some(pool) = test_pool().await else {
        return;
    };
    seed_habit_tracker(&pool).await;
    let repository = PostgresDatasetMigrationRepository::new(pool.clone());
    let dataset = habits();
    let working_set = working_set(&[1, 2]);

    let transaction = repository.begin_dataset_transaction(&dataset).await;
    assert!(transaction.is_ok());
    let mut transaction = transaction.unwrap_or_else(|_| unreachable!());

    assert!(matches!(
        transaction.archive_matching_rows(&dataset, &working_set).await,
        Ok(3)
    ));
    assert!(
        transaction
            .append_audit_entry(AuditEntry::archived(
                BatchId::FIRST,
                "habits",
                3,
                &actor(),
                Utc::now(),
            ))
            .await
            .is_ok()
    );
    assert!(matches!(
        transaction.delete_archived_rows(&dataset, &working_set).await,
        Ok(3)
    ));
    assert!(transaction.rollback().await.is_ok());

    assert_eq!(count(&pool, "SELECT COUNT(*) FROM habits").await, 3);
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM habits_archive").await, 0);
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM retirement_audit_entries").await,
        0
    );
}

#[tokio::test]
async fn rows_already_archived_verbatim_are_not_copied_twice() {
    let Some(pool) = test_pool().await else {
        return;
    };
    seed_habit_tracker(&pool).await;
    execute(
        &pool,
        "INSERT INTO habits_archive SELECT * FROM habits WHERE id = 10",
    )
    .await;
    let repository = PostgresDatasetMigrationRepository::new(pool.clone());
    let dataset = habits();
    let working_set = working_set(&[1]);

    let transaction = repository.begin_dataset_transaction(&dataset).await;
    assert!(transaction.is_ok());
    let mut transaction = transaction.unwrap_or_else(|_| unreachable!());

    assert!(matches!(
        transaction.archive_matching_rows(&dataset, &working_set).await,
        Ok(1)
    ));
    assert!(matches!(
        transaction.delete_archived_rows(&dataset, &working_set).await,
        Ok(2)
    ));
    assert!(transaction.commit().await.is_ok());

    assert_eq!(count(&pool, "SELECT COUNT(*) FROM habits_archive").await, 2);
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM habits WHERE user_id = 2").await,
        1
    );
}

#[tokio::test]
async fn rows_without_a_matching_archive_copy_are_not_deleted() {
    let Some(pool) = test_pool().await else {
        return;
    };
    seed_habit_tracker(&pool).await;
    let repository = PostgresDatasetMigrationRepository::new(pool.clone());
    let dataset = habits();
    let working_set = working_set(&[2]);

    let transaction = repository.begin_dataset_transaction(&dataset).await;
    assert!(transaction.is_ok());
    let mut transaction = transaction.unwrap_or_else(|_| unreachable!());

    assert!(matches!(
        transaction.delete_archived_rows(&dataset, &working_set).await,
        Ok(0)
    ));
    assert!(matches!(
        transaction.count_matching_rows(&dataset, &working_set).await,
        Ok(1)
    ));
    assert!(transaction.rollback().await.is_ok());
}
