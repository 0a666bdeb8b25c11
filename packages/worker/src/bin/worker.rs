//! Pipeline worker process.
//!
//! Wires the kernel (database, scraper, agents, config, queue), runs
//! migrations, seeds default config, then hosts the worker pool and the
//! cron scheduler until shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use worker_core::domains::processors::standard_processors;
use worker_core::kernel::agent::{AgentManager, CostTracker, PostgresCostLedger};
use worker_core::kernel::config::{ConfigKey, ConfigRegistry, SchedulerSettings};
use worker_core::kernel::queue::{PostgresQueueStore, QueueManager, QueueStore};
use worker_core::kernel::scheduler::{spawn_pool, start_scheduler};
use worker_core::kernel::scrape::HttpScraper;
use worker_core::kernel::{OpenAiClient, WorkerKernel};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,worker_core=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    tracing::info!("Starting job pipeline worker");

    // Load environment variables
    dotenvy::dotenv().ok();

    // Database setup
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations up to date");

    // Config registry, seeded so operators can edit values in place
    let config = Arc::new(ConfigRegistry::new(pool.clone()));
    config.seed_defaults().await?;

    // Agent manager with whichever providers have credentials
    let ledger: Arc<dyn CostTracker> = Arc::new(PostgresCostLedger::new(pool.clone()));
    let mut agents = AgentManager::new(config.clone(), ledger.clone());
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.is_empty() => {
            let default_model =
                std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
            agents = agents.with_provider(Arc::new(
                OpenAiClient::new(key, default_model)
                    .map_err(|e| anyhow::anyhow!("failed to build OpenAI client: {e}"))?,
            ));
        }
        _ => tracing::warn!("OPENAI_API_KEY not set; analysis steps will park until configured"),
    }
    let agents = Arc::new(agents);
    tracing::info!(providers = ?agents.provider_names(), "agent providers registered");

    // Scraper
    let scraper = Arc::new(
        HttpScraper::new(Duration::from_secs(60))
            .map_err(|e| anyhow::anyhow!("failed to build scraper: {e}"))?,
    );

    // Queue
    let store: Arc<dyn QueueStore> = Arc::new(PostgresQueueStore::new(pool.clone()));
    let queue = Arc::new(QueueManager::new(store));

    let kernel = Arc::new(WorkerKernel::new(
        pool,
        scraper,
        agents,
        config,
        queue,
    ));

    // Workers + cron
    let shutdown = CancellationToken::new();

    // Surface config edits in the logs as they land
    let watch_handle = kernel.config.watch(
        SchedulerSettings::KEY,
        Duration::from_secs(30),
        shutdown.clone(),
        |value| {
            tracing::info!(value = %value, "scheduler settings changed");
        },
    );
    let handles = spawn_pool(kernel.clone(), Arc::new(standard_processors()), shutdown.clone()).await;
    let mut scheduler = start_scheduler(kernel.clone(), ledger).await?;

    tracing::info!("pipeline running; Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("shutdown requested, draining workers");
    shutdown.cancel();
    futures::future::join_all(handles).await;
    let _ = watch_handle.await;
    scheduler.shutdown().await.ok();

    tracing::info!("worker stopped");
    Ok(())
}
