use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Connects to `DATABASE_URL` inside a fresh schema with migrations applied.
///
/// Returns `None` when no database is configured so Postgres tests are skipped.
pub(crate) async fn test_pool() -> Option<PgPool> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        return None;
    };

    let schema = format!("retirement_test_{}", uuid::Uuid::new_v4().simple());

    let admin = match PgPoolOptions::new()
        .max_connections(1)
        .connect(database_url.as_str())
        .await
    {
        Ok(pool) => pool,
        Err(error) => panic!("failed to connect to DATABASE_URL in test: {error}"),
    };
    if let Err(error) = admin
        .execute(format!("CREATE SCHEMA \"{schema}\"").as_str())
        .await
    {
        panic!("failed to create test schema {schema}: {error}");
    }
    admin.close().await;

    let search_path = format!("SET search_path TO \"{schema}\"");
    let pool = match PgPoolOptions::new()
        .max_connections(2)
        .after_connect(move |connection, _metadata| {
            let search_path = search_path.clone();
            Box::pin(async move {
                connection
                    .execute(search_path.as_str())
                    .await
                    .map(|_| ())
            })
        })
        .connect(database_url.as_str())
        .await
    {
        Ok(pool) => pool,
        Err(error) => panic!("failed to connect to DATABASE_URL in test: {error}"),
    };

    if let Err(error) = MIGRATOR.run(&pool).await {
        panic!("failed to run migrations for retirement tests: {error}");
    }

    Some(pool)
}

/// Runs one setup statement, failing the test on error.
pub(crate) async fn execute(pool: &PgPool, statement: &str) {
    if let Err(error) = pool.execute(statement).await {
        panic!("failed to run test setup statement: {error}\n{statement}");
    }
}

/// Seeds unassigned pending candidates for the given entity ids.
pub(crate) async fn seed_candidates(pool: &PgPool, entity_ids: &[i64]) {
    let insert = sqlx::query(
        r#"
        INSERT INTO retirement_candidates (entity_id)
        SELECT UNNEST($1::BIGINT[])
        "#,
    )
    .bind(entity_ids)
    .execute(pool)
    .await;

    assert!(insert.is_ok());
}

/// Creates a small habit tracker schema with archive destinations.
pub(crate) async fn create_habit_tracker_tables(pool: &PgPool) {
    execute(
        pool,
        r#"
        CREATE TABLE users (
            id BIGINT PRIMARY KEY,
            role TEXT NOT NULL,
            last_login_at TIMESTAMPTZ NULL
        );
        CREATE TABLE habits (
            id BIGINT PRIMARY KEY,
            user_id BIGINT NOT NULL,
            name TEXT NOT NULL
        );
        CREATE TABLE habit_logs (
            id BIGINT PRIMARY KEY,
            habit_id BIGINT NOT NULL,
            note TEXT NULL
        );
        CREATE TABLE users_archive (LIKE users);
        CREATE TABLE habits_archive (LIKE habits);
        CREATE TABLE habit_logs_archive (LIKE habit_logs);
        "#,
    )
    .await;
}
