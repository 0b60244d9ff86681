use anyhow::Context;
use dotenvy::dotenv;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod handlers;
mod middleware;
mod models;
mod rate_limit;
mod routes;

use config::Config;
use rate_limit::{RateLimitConfig, RateLimiter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("todo_service=debug,tower_http=debug")),
        )
        .init();

    let config = Config::from_env().context("invalid configuration")?;

    let pool = db::init_pool(&config).await.context("DB connection failed")?;
    db::run_migrations(&pool).await.context("failed to apply migrations")?;

    let rate_config = RateLimitConfig::default();
    tracing::info!(
        refill_interval_ms = rate_config.refill_interval.as_millis() as u64,
        burst = rate_config.burst,
        idle_ttl_secs = rate_config.idle_ttl.as_secs(),
        "Rate limiter configured"
    );
    let limiter = RateLimiter::new(rate_config);
    let sweeper = limiter.spawn_sweeper();

    let app = routes::app(
        pool.clone(),
        limiter,
        middleware::cors_layer(&config.cors_allow_origins),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server at {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    sweeper.shutdown().await;
    pool.close().await;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
