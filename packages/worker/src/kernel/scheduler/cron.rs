//! Scheduled background tasks using tokio-cron-scheduler.
//!
//! Three timers drive the pipeline from the outside:
//! - hourly scrape tick: enqueues SCRAPE_SOURCE items for due sources,
//!   gated on the scheduler being enabled, the daytime window and the
//!   daily match target
//! - minutely lease sweep: returns expired claims to the pending pool
//! - daily cost report: logs yesterday's ledger per provider
//!
//! Timers enqueue work and sweep state; they never process items.

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};

use crate::domains::intake;
use crate::domains::listings::JobMatch;
use crate::domains::sources::JobSource;
use crate::kernel::agent::CostTracker;
use crate::kernel::config::{SchedulerSettings, WorkerSettings};
use crate::kernel::queue::ItemOrigin;
use crate::kernel::WorkerKernel;

/// Start all scheduled tasks.
pub async fn start_scheduler(
    kernel: Arc<WorkerKernel>,
    ledger: Arc<dyn CostTracker>,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    // Scrape tick - every hour on the hour
    let scrape_kernel = kernel.clone();
    let scrape_job = Job::new_async("0 0 * * * *", move |_uuid, _lock| {
        let kernel = scrape_kernel.clone();
        Box::pin(async move {
            if let Err(e) = run_scrape_tick(&kernel).await {
                error!("scrape tick failed: {}", e);
            }
        })
    })?;
    scheduler.add(scrape_job).await?;

    // Lease sweep - every minute
    let sweep_kernel = kernel.clone();
    let sweep_job = Job::new_async("0 * * * * *", move |_uuid, _lock| {
        let kernel = sweep_kernel.clone();
        Box::pin(async move {
            if let Err(e) = run_lease_sweep(&kernel).await {
                error!("lease sweep failed: {}", e);
            }
        })
    })?;
    scheduler.add(sweep_job).await?;

    // Cost rollover report - daily at 00:05 UTC
    let report_kernel = kernel.clone();
    let report_job = Job::new_async("0 5 0 * * *", move |_uuid, _lock| {
        let kernel = report_kernel.clone();
        let ledger = ledger.clone();
        Box::pin(async move {
            if let Err(e) = run_cost_report(&kernel, ledger.as_ref()).await {
                error!("cost report failed: {}", e);
            }
        })
    })?;
    scheduler.add(report_job).await?;

    scheduler.start().await?;
    info!("scheduled tasks started (scrape hourly, lease sweep minutely, cost report daily)");
    Ok(scheduler)
}

/// Enqueue scrapes for due sources, least-recently-scraped first.
pub async fn run_scrape_tick(kernel: &WorkerKernel) -> Result<()> {
    let settings: SchedulerSettings = kernel.config.get().await;
    let now = Utc::now();

    if !settings.enabled {
        debug!("scheduler disabled, skipping scrape tick");
        return Ok(());
    }
    if !settings.within_daytime(now) {
        info!("outside daytime hours, skipping scrape tick");
        return Ok(());
    }

    // Enough matches already today: let the budget rest
    let local_midnight = now
        .with_timezone(&settings.tz())
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_local_timezone(settings.tz())
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now - Duration::hours(24));
    let matches_today =
        JobMatch::count_since(local_midnight, settings.min_match_score, &kernel.db_pool).await?;
    if matches_today >= settings.target_matches {
        info!(
            matches_today,
            target = settings.target_matches,
            "daily match target reached, skipping scrape tick"
        );
        return Ok(());
    }

    let cooldown = Duration::minutes(settings.scrape_cooldown_minutes);
    let due = JobSource::find_due_for_scraping(cooldown, settings.max_sources, &kernel.db_pool).await?;

    if due.is_empty() {
        info!("no sources due for scraping");
        return Ok(());
    }

    info!(count = due.len(), "enqueuing scrapes for due sources");
    for source in due {
        match intake::trigger_scrape(&kernel.queue, source.id, ItemOrigin::Scheduled).await {
            Ok(result) if result.is_created() => {
                info!(source = %source.id, name = %source.name, item = %result.item_id(), "scrape enqueued");
            }
            Ok(_) => {
                debug!(source = %source.id, "scrape already queued this hour");
            }
            Err(err) => {
                warn!(source = %source.id, error = %err, "failed to enqueue scrape");
            }
        }
    }

    Ok(())
}

/// Return expired claims to the pending pool so dead workers lose nothing.
pub async fn run_lease_sweep(kernel: &WorkerKernel) -> Result<()> {
    let settings: WorkerSettings = kernel.config.get().await;
    kernel.queue.release_expired(settings.lease_ttl()).await?;
    Ok(())
}

/// Log yesterday's spend per provider/model.
pub async fn run_cost_report(kernel: &WorkerKernel, ledger: &dyn CostTracker) -> Result<()> {
    let settings: SchedulerSettings = kernel.config.get().await;
    let yesterday = (Utc::now().with_timezone(&settings.tz()) - Duration::days(1)).date_naive();

    let summaries = ledger.summaries_for(yesterday).await?;
    if summaries.is_empty() {
        info!(date = %yesterday, "no AI spend recorded");
        return Ok(());
    }
    for row in summaries {
        info!(
            date = %row.date,
            provider = %row.provider,
            model = %row.model,
            requests = row.requests,
            cost_usd = row.cost_usd,
            "daily AI spend"
        );
    }
    Ok(())
}
