use std::sync::Arc;

use fieldflow::jobs::JobScheduler;
use fieldflow::{database, AutomationCore, Config, PgStore};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let db_pool = database::connect(&config.database).await?;

    database::ensure_reachable(&db_pool).await?;
    database::migrate(&db_pool).await?;

    if !config.agents.is_configured() {
        warn!("AGENT_API_TOKEN is not set, agent calls will be sent without credentials");
    }

    let store = Arc::new(PgStore::new(db_pool));
    let mut core = AutomationCore::new(store, &config)?;
    let worker = core.spawn_worker();

    let mut scheduler = JobScheduler::new(core.agents.clone(), config.jobs.clone()).await?;
    scheduler.start().await?;

    info!("Fieldflow automation core running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutdown requested");
    scheduler.shutdown().await?;

    // Dropping the core closes the work queue so the worker loop can drain and exit.
    drop(core);
    if let Some(handle) = worker {
        handle.await?;
    }

    Ok(())
}
