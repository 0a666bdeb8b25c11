//! Operator CLI: submit work, trigger scrapes, inspect the pipeline.
//!
//! Talks straight to the database; the worker process picks the work up on
//! its next poll.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use worker_core::common::SourceId;
use worker_core::domains::intake;
use worker_core::domains::sources::{JobSource, SourceType};
use worker_core::domains::views;
use worker_core::kernel::agent::{AgentManager, CostTracker, PostgresCostLedger};
use worker_core::kernel::config::{ConfigRegistry, SchedulerSettings};
use worker_core::kernel::queue::{
    ItemOrigin, PostgresQueueStore, QueueFilter, QueueItemStatus, QueueItemType, QueueManager,
    QueueStore,
};
use worker_core::kernel::scrape::HttpScraper;
use worker_core::kernel::WorkerKernel;

#[derive(Parser)]
#[command(name = "jobctl")]
#[command(about = "Operator CLI for the job pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a job listing URL
    Submit { url: String },

    /// Submit a company for research
    SubmitCompany {
        name: String,
        #[arg(long)]
        website: Option<String>,
    },

    /// Register a job source
    AddSource {
        name: String,
        url: String,
        #[arg(long, default_value = "html")]
        source_type: String,
    },

    /// Enqueue a scrape for one source, or all due sources
    TriggerScrape {
        #[arg(long)]
        source_id: Option<String>,
    },

    /// Pipeline health snapshot
    Stats,

    /// List queue items
    Queue {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        item_type: Option<String>,
        #[arg(long, default_value_t = 25)]
        limit: i64,
    },

    /// Enable the cron scheduler
    Start,

    /// Disable the cron scheduler
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .context("Failed to connect to database")?;

    let config = Arc::new(ConfigRegistry::new(pool.clone()));
    let ledger: Arc<dyn CostTracker> = Arc::new(PostgresCostLedger::new(pool.clone()));
    let store: Arc<dyn QueueStore> = Arc::new(PostgresQueueStore::new(pool.clone()));
    let queue = Arc::new(QueueManager::new(store));
    let kernel = WorkerKernel::new(
        pool.clone(),
        Arc::new(
            HttpScraper::new(Duration::from_secs(30))
                .map_err(|e| anyhow::anyhow!("failed to build scraper: {e}"))?,
        ),
        Arc::new(AgentManager::new(config.clone(), ledger.clone())),
        config.clone(),
        queue.clone(),
    );

    match cli.command {
        Commands::Submit { url } => {
            let result =
                intake::submit_job_url(&queue, &url, ItemOrigin::UserSubmission, None).await?;
            println!(
                "{} {}",
                if result.is_created() { "queued" } else { "duplicate of" },
                result.item_id()
            );
        }
        Commands::SubmitCompany { name, website } => {
            let result = intake::submit_company(&queue, &name, website.as_deref()).await?;
            println!(
                "{} {}",
                if result.is_created() { "queued" } else { "duplicate of" },
                result.item_id()
            );
        }
        Commands::AddSource {
            name,
            url,
            source_type,
        } => {
            let source_type: SourceType = serde_json::from_value(serde_json::json!(source_type.as_str()))
                .map_err(|_| anyhow::anyhow!("unknown source type: {source_type}"))?;
            let source = JobSource::builder()
                .name(name)
                .url(url)
                .source_type(source_type)
                .build();
            let stored = intake::submit_source(&pool, source).await?;
            println!("source {} ({})", stored.id, stored.url);
        }
        Commands::TriggerScrape { source_id } => match source_id {
            Some(raw) => {
                let id = SourceId::from_str(&raw).context("invalid source id")?;
                let result = intake::trigger_scrape(&queue, id, ItemOrigin::UserSubmission).await?;
                println!(
                    "{} {}",
                    if result.is_created() { "queued" } else { "already queued as" },
                    result.item_id()
                );
            }
            None => {
                worker_core::kernel::scheduler::run_scrape_tick(&kernel).await?;
                println!("scrape tick executed");
            }
        },
        Commands::Stats => {
            let snapshot = views::stats(&kernel, &ledger).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Queue {
            status,
            item_type,
            limit,
        } => {
            let status: Option<QueueItemStatus> = status
                .map(|s| {
                    serde_json::from_value(serde_json::json!(s.as_str()))
                        .map_err(|_| anyhow::anyhow!("unknown status: {s}"))
                })
                .transpose()?;
            let item_type: Option<QueueItemType> = item_type
                .map(|t| {
                    serde_json::from_value(serde_json::json!(t.as_str()))
                        .map_err(|_| anyhow::anyhow!("unknown item type: {t}"))
                })
                .transpose()?;
            let items = views::list_queue_items(
                &kernel,
                QueueFilter {
                    status,
                    item_type,
                    root_id: None,
                    limit,
                },
            )
            .await?;
            for item in items {
                println!(
                    "{}  {:<16} {:<14} {:?}  attempts={} url={}",
                    item.id,
                    item.item_type.as_str(),
                    format!("{:?}", item.status).to_lowercase(),
                    item.step,
                    item.attempts,
                    item.url.as_deref().unwrap_or("-"),
                );
            }
        }
        Commands::Start => {
            set_scheduler_enabled(&config, true).await?;
            println!("scheduler enabled");
        }
        Commands::Stop => {
            set_scheduler_enabled(&config, false).await?;
            println!("scheduler disabled");
        }
    }

    Ok(())
}

async fn set_scheduler_enabled(config: &ConfigRegistry, enabled: bool) -> Result<()> {
    let mut settings: SchedulerSettings = config.get().await;
    settings.enabled = enabled;
    config.set(&settings).await
}
