use sqlx::migrate::{MigrateError, Migrator};
use sqlx::{Pool, Postgres};

use crate::config::Config;

static MIGRATOR: Migrator = sqlx::migrate!();

pub async fn init_pool(config: &Config) -> Result<Pool<Postgres>, sqlx::Error> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
}

/// Brings the schema up to date; already-applied migrations are skipped.
pub async fn run_migrations(pool: &Pool<Postgres>) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}
