use std::sync::Arc;

use chrono::Utc;
use sqlx::{FromRow, PgPool};
use sunset_application::{
    AuditRepository, DatasetMigrationRepository, RetirementService, WorkingSet,
};
use sunset_core::ActorIdentity;
use sunset_domain::{
    AuditEntry, BatchId, CandidateId, DatasetCatalog, DatasetDescriptor, DisqualificationRule,
    EligibilityPolicy, EntityId, ParentLink, ProfileSource, RunPhase, SqlIdentifier,
};

use super::PostgresAuditRepository;
use crate::postgres_test_support::{
    create_habit_tracker_tables, execute, seed_candidates, test_pool,
};
use crate::{PostgresCandidateRepository, PostgresDatasetMigrationRepository};

#[derive(Debug, FromRow)]
struct StoredEntry {
    batch_id: Option<i64>,
    dataset_name: String,
    message: String,
    error_info: Option<String>,
    actor_id: String,
}

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

fn catalog() -> DatasetCatalog {
    let habit_logs = descriptor("habit_logs", "habit_id")
        .with_parent(ParentLink::new(ident("habits"), ident("id"), ident("user_id")))
        .unwrap_or_else(|_| unreachable!());

    DatasetCatalog::new(
        vec![habit_logs, descriptor("habits", "user_id")],
        descriptor("users", "id"),
    )
    .unwrap_or_else(|_| unreachable!())
}

fn policy() -> EligibilityPolicy {
    let bank_accounts =
        DisqualificationRule::new("linked_bank_account", ident("bank_accounts"), ident("user_id"))
            .and_then(|rule| {
                rule.with_status_filter(ident("status"), vec!["active".to_owned()])
            })
            .unwrap_or_else(|_| unreachable!());

    EligibilityPolicy::new(
        365,
        vec!["member".to_owned()],
        vec![bank_accounts],
        ProfileSource::new(
            ident("users"),
            ident("id"),
            ident("role"),
            ident("last_login_at"),
        ),
    )
    .unwrap_or_else(|_| unreachable!())
}

fn actor() -> ActorIdentity {
    ActorIdentity::new("svc-retirement").unwrap_or_else(|_| unreachable!())
}

fn service(pool: &PgPool) -> RetirementService {
    RetirementService::new(
        Arc::new(PostgresCandidateRepository::new(pool.clone())),
        Arc::new(PostgresDatasetMigrationRepository::new(pool.clone())),
        Arc::new(PostgresAuditRepository::new(pool.clone())),
        catalog(),
        policy(),
        actor(),
    )
}

async fn seed_habit_tracker(pool: &PgPool) {
    create_habit_tracker_tables(pool).await;
    execute(
        pool,
        r#"
        CREATE TABLE bank_accounts (
            id BIGINT PRIMARY KEY,
            user_id BIGINT NOT NULL,
            status TEXT NOT NULL
        );
        INSERT INTO users (id, role, last_login_at) VALUES
            (1, 'member', NULL),
            (2, 'member', now() - INTERVAL '900 days');
        INSERT INTO bank_accounts (id, user_id, status) VALUES
            (50, 2, 'active');
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

async fn stored_entries(pool: &PgPool) -> Vec<StoredEntry> {
    let entries = sqlx::query_as::<_, StoredEntry>(
        r#"
        SELECT batch_id, dataset_name, message, error_info, actor_id
        FROM retirement_audit_entries
        ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await;

    assert!(entries.is_ok());
    entries.unwrap_or_default()
}

async fn count(pool: &PgPool, statement: &str) -> i64 {
    let count = sqlx::query_scalar::<_, i64>(statement)
        .fetch_one(pool)
        .await;
    assert!(count.is_ok());
    count.unwrap_or_default()
}

async fn candidate_status(pool: &PgPool, entity_id: i64) -> String {
    let status = sqlx::query_scalar::<_, String>(
        "SELECT status FROM retirement_candidates WHERE entity_id = $1",
    )
    .bind(entity_id)
    .fetch_one(pool)
    .await;
    assert!(status.is_ok());
    status.unwrap_or_default()
}

#[tokio::test]
async fn failure_entry_commits_after_dataset_transaction_rolls_back() {
    let Some(pool) = test_pool().await else {
        return;
    };
    seed_habit_tracker(&pool).await;
    let datasets = PostgresDatasetMigrationRepository::new(pool.clone());
    let audit = PostgresAuditRepository::new(pool.clone());
    let dataset = descriptor("habits", "user_id");
    let working_set = WorkingSet {
        batch_id: BatchId::FIRST,
        candidate_ids: vec![CandidateId::new(1)],
        entity_ids: vec![EntityId::new(1)],
    };

    let transaction = datasets.begin_dataset_transaction(&dataset).await;
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
                "habits",
                2,
                &actor(),
                Utc::now(),
            ))
            .await
            .is_ok()
    );
    assert!(transaction.rollback().await.is_ok());

    let appended = audit
        .append_entry(AuditEntry::failed(
            Some(BatchId::FIRST),
            Some("habits"),
            RunPhase::ProcessDatasets,
            "failed to delete archived rows: connection reset".to_owned(),
            &actor(),
            Utc::now(),
        ))
        .await;
    assert!(appended.is_ok());

    let entries = stored_entries(&pool).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].batch_id, Some(1));
    assert_eq!(entries[0].dataset_name, "habits");
    assert_eq!(entries[0].message, "failed during process_datasets");
    assert_eq!(
        entries[0].error_info.as_deref(),
        Some("failed to delete archived rows: connection reset")
    );
    assert_eq!(entries[0].actor_id, "svc-retirement");
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM habits_archive").await, 0);
}

#[tokio::test]
async fn audit_entries_cannot_be_rewritten() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let audit = PostgresAuditRepository::new(pool.clone());
    let appended = audit
        .append_entry(AuditEntry::failed(
            None,
            None,
            RunPhase::AllocateBatch,
            "database unavailable".to_owned(),
            &actor(),
            Utc::now(),
        ))
        .await;
    assert!(appended.is_ok());

    let rewrite = sqlx::query("UPDATE retirement_audit_entries SET message = 'ok'")
        .execute(&pool)
        .await;
    assert!(rewrite.is_err());
    let removal = sqlx::query("DELETE FROM retirement_audit_entries")
        .execute(&pool)
        .await;
    assert!(removal.is_err());

    let entries = stored_entries(&pool).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].dataset_name, "-");
    assert_eq!(entries[0].batch_id, None);
}

#[tokio::test]
async fn service_run_retires_dormant_account_and_resumes_after_failure() {
    let Some(pool) = test_pool().await else {
        return;
    };
    seed_habit_tracker(&pool).await;
    seed_candidates(&pool, &[1, 2]).await;
    execute(&pool, "DROP TABLE habits_archive").await;
    let engine = service(&pool);

    let failed = engine.run().await;
    assert!(failed.is_err());
    assert_eq!(candidate_status(&pool, 1).await, "in_progress");
    assert_eq!(candidate_status(&pool, 2).await, "canceled");

    let entries = stored_entries(&pool).await;
    let messages: Vec<(&str, &str)> = entries
        .iter()
        .map(|entry| (entry.dataset_name.as_str(), entry.message.as_str()))
        .collect();
    assert_eq!(
        messages,
        vec![
            ("habit_logs", "records archived: 2"),
            ("habit_logs", "records deleted: 2"),
            ("habits", "failed during process_datasets"),
        ]
    );
    assert!(entries[2].error_info.is_some());
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM habits WHERE user_id = 1").await, 2);

    execute(&pool, "CREATE TABLE habits_archive (LIKE habits)").await;
    let resumed = engine.run().await;
    assert!(resumed.is_ok());
    let resumed = resumed.unwrap_or_default();
    assert_eq!(resumed.datasets_skipped, 1);
    assert_eq!(resumed.datasets_migrated, 2);
    assert_eq!(resumed.batches_completed, 1);
    assert_eq!(candidate_status(&pool, 1).await, "completed");

    assert_eq!(count(&pool, "SELECT COUNT(*) FROM users").await, 1);
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM users_archive WHERE id = 1").await, 1);
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM habits").await, 1);
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM habits_archive").await, 2);
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM habit_logs").await, 1);
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM retirement_audit_entries").await, 7);
}
