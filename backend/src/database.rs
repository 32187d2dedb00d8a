use sqlx::{migrate::MigrateDatabase, postgres::PgPoolOptions, PgPool, Postgres};
use tracing::{info, warn};

use crate::config::DatabaseConfig;

/// Open the pool, creating the database on first start.
pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<PgPool> {
    if !Postgres::database_exists(&config.url).await? {
        Postgres::create_database(&config.url).await?;
        info!("Database created");
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections.min(config.max_connections))
        .acquire_timeout(config.acquire_timeout())
        .idle_timeout(config.idle_timeout())
        .test_before_acquire(true)
        .connect(&config.url)
        .await?;

    info!(
        "Database pool ready: max={}, min={}, acquire_timeout={}s",
        config.max_connections, config.min_connections, config.acquire_timeout_secs
    );

    Ok(pool)
}

/// Apply the automation core schema.
pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations completed");
    Ok(())
}

/// Fail fast when the pool cannot serve a trivial query.
pub async fn ensure_reachable(pool: &PgPool) -> anyhow::Result<()> {
    if let Err(e) = sqlx::query("SELECT 1").execute(pool).await {
        warn!("Database health check failed: {}", e);
        anyhow::bail!("database unreachable: {}", e);
    }
    Ok(())
}
