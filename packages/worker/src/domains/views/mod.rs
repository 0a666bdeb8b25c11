//! Read-only query surface for operators and upstream collaborators.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domains::listings::{JobListing, JobMatch, ListingStatus, MatchPriority};
use crate::domains::sources::JobSource;
use crate::kernel::agent::{CostSummary, CostTracker};
use crate::kernel::config::SchedulerSettings;
use crate::kernel::queue::{QueueFilter, QueueItem, QueueItemStatus};
use crate::kernel::WorkerKernel;

/// One snapshot of pipeline health.
#[derive(Debug, Serialize)]
pub struct StatsSnapshot {
    pub queue_counts: HashMap<QueueItemStatus, i64>,
    pub listing_counts: Vec<(ListingStatus, i64)>,
    pub matches_today: i64,
    pub cost_today: Vec<CostSummary>,
    pub circuit_broken_sources: i64,
    pub last_poll_at: Option<DateTime<Utc>>,
}

pub async fn list_queue_items(
    kernel: &WorkerKernel,
    filter: QueueFilter,
) -> Result<Vec<QueueItem>> {
    Ok(kernel.queue.store().list(filter).await?)
}

pub async fn list_job_listings(
    kernel: &WorkerKernel,
    status: Option<ListingStatus>,
    limit: i64,
) -> Result<Vec<JobListing>> {
    Ok(JobListing::list(status, limit, &kernel.db_pool).await?)
}

pub async fn list_job_matches(
    kernel: &WorkerKernel,
    min_score: Option<i32>,
    priority: Option<MatchPriority>,
    limit: i64,
) -> Result<Vec<JobMatch>> {
    Ok(JobMatch::list(min_score, priority, limit, &kernel.db_pool).await?)
}

pub async fn stats(kernel: &WorkerKernel, ledger: &Arc<dyn CostTracker>) -> Result<StatsSnapshot> {
    let settings: SchedulerSettings = kernel.config.get().await;
    let tz = settings.tz();
    let today = Utc::now().with_timezone(&tz).date_naive();
    let local_midnight = today
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_local_timezone(tz)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Ok(StatsSnapshot {
        queue_counts: kernel.queue.store().count_by_status().await?,
        listing_counts: JobListing::count_by_status(&kernel.db_pool).await?,
        matches_today: JobMatch::count_since(
            local_midnight,
            settings.min_match_score,
            &kernel.db_pool,
        )
        .await?,
        cost_today: ledger.summaries_for(today).await?,
        circuit_broken_sources: JobSource::count_circuit_broken(&kernel.db_pool).await?,
        last_poll_at: kernel.queue.last_poll_at(),
    })
}
