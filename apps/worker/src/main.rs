//! Sunset retirement worker: runs one retirement pass and exits.

#![forbid(unsafe_code)]

mod catalog_file;

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use sunset_application::RetirementService;
use sunset_core::{ActorIdentity, AppError, AppResult};
use sunset_infrastructure::{
    PostgresAuditRepository, PostgresCandidateRepository, PostgresDatasetMigrationRepository,
};

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::catalog_file::CatalogFile;

const DEFAULT_CATALOG_PATH: &str = "config/retirement_catalog.json";

#[derive(Debug, Clone)]
struct WorkerConfig {
    database_url: String,
    actor_id: String,
    dormancy_threshold_days: u32,
    promotable_roles: Vec<String>,
    catalog_path: PathBuf,
    max_connections: u32,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::load()?;
    let actor = ActorIdentity::new(config.actor_id.as_str())?;
    let catalog_file = CatalogFile::load(config.catalog_path.as_path())?;
    let catalog = catalog_file.dataset_catalog()?;
    let policy = catalog_file.eligibility_policy(
        config.dormancy_threshold_days,
        config.promotable_roles.clone(),
    )?;

    info!(
        actor_id = %actor.actor_id(),
        catalog_path = %config.catalog_path.display(),
        datasets = catalog.len(),
        disqualification_rules = policy.rules().len(),
        "sunset-worker configured"
    );

    let pool = connect_and_migrate(config.database_url.as_str(), config.max_connections).await?;
    let service = RetirementService::new(
        Arc::new(PostgresCandidateRepository::new(pool.clone())),
        Arc::new(PostgresDatasetMigrationRepository::new(pool.clone())),
        Arc::new(PostgresAuditRepository::new(pool.clone())),
        catalog,
        policy,
        actor,
    );

    let outcome = service.run().await;
    pool.close().await;

    let report = outcome?;
    info!(
        batches_completed = report.batches_completed,
        records_archived = report.records_archived,
        records_deleted = report.records_deleted,
        candidates_canceled = report.candidates_canceled,
        candidates_held = report.candidates_held,
        "sunset-worker finished"
    );

    Ok(())
}

async fn connect_and_migrate(database_url: &str, max_connections: u32) -> AppResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))?;

    sqlx::migrate!("../../crates/infrastructure/migrations")
        .run(&pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to run migrations: {error}")))?;

    Ok(pool)
}

impl WorkerConfig {
    fn load() -> AppResult<Self> {
        let database_url = required_env("DATABASE_URL")?;
        let actor_id = required_env("RETIREMENT_ACTOR_ID")?;
        let dormancy_threshold_days = parse_env_u32("RETIREMENT_DORMANCY_DAYS", 365)?;
        let promotable_roles = parse_env_list("RETIREMENT_PROMOTABLE_ROLES", &["member"]);
        let catalog_path = env::var("RETIREMENT_CATALOG_PATH")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_CATALOG_PATH), PathBuf::from);
        let max_connections = parse_env_u32("RETIREMENT_MAX_CONNECTIONS", 2)?;

        if dormancy_threshold_days == 0 {
            return Err(AppError::Validation(
                "RETIREMENT_DORMANCY_DAYS must be greater than zero".to_owned(),
            ));
        }

        if max_connections == 0 {
            return Err(AppError::Validation(
                "RETIREMENT_MAX_CONNECTIONS must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            database_url,
            actor_id,
            dormancy_threshold_days,
            promotable_roles,
            catalog_path,
            max_connections,
        })
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required_env(name: &str) -> AppResult<String> {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| AppError::Validation(format!("{name} is required")))
}

fn parse_env_u32(name: &str, default: u32) -> AppResult<u32> {
    match env::var(name) {
        Ok(value) => value.trim().parse::<u32>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_list(name: &str, default: &[&str]) -> Vec<String> {
    match env::var(name) {
        Ok(value) => split_list(value.as_str()),
        Err(_) => default.iter().map(|item| (*item).to_owned()).collect(),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}
