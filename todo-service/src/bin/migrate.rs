use anyhow::Context;
use sqlx::PgPool;
use std::env;

// Applies pending schema migrations without starting the server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = PgPool::connect(&database_url).await.context("failed to connect to DB")?;

    let migrator = sqlx::migrate!();
    migrator.run(&pool).await.context("failed to apply migrations")?;

    println!("Schema up to date ({} migration(s) known).", migrator.iter().count());
    pool.close().await;
    Ok(())
}
