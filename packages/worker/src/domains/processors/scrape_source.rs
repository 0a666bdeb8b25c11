//! SCRAPE_SOURCE lane: fetch_page → intake → update_stats.
//!
//! A scheduled scrape of one source. The fetch walks the source's pages
//! (cursor-bounded), intake turns each raw listing into its own JOB lineage
//! with dedup, and the stats step closes the books on the source record.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{Outcome, Processor};
use crate::common::{canonical_company_name, SourceId};
use crate::domains::intake;
use crate::domains::sources::JobSource;
use crate::kernel::error::ProcessError;
use crate::kernel::queue::{ItemOrigin, QueueItem, QueueItemType, QueueStep, Submission};
use crate::kernel::scrape::{RawListing, SourceRequest};
use crate::kernel::WorkerKernel;

/// Pagination bound for one scrape.
const MAX_PAGES: usize = 10;
/// Listings carried into the intake step per scrape.
const MAX_LISTINGS_PER_SCRAPE: usize = 200;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScrapeSourcePayload {
    pub source_id: SourceId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeIntakePayload {
    pub source_id: SourceId,
    pub listings: Vec<RawListing>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeStatsPayload {
    pub source_id: SourceId,
    pub found: i64,
    pub new_jobs: i64,
}

pub struct ScrapeSourceProcessor;

#[async_trait]
impl Processor for ScrapeSourceProcessor {
    fn item_type(&self) -> QueueItemType {
        QueueItemType::ScrapeSource
    }

    async fn process(
        &self,
        item: &QueueItem,
        kernel: &WorkerKernel,
    ) -> Result<Outcome, ProcessError> {
        match item.step {
            Some(QueueStep::FetchPage) => self.fetch_pages(item, kernel).await,
            Some(QueueStep::Intake) => self.intake(item, kernel).await,
            Some(QueueStep::UpdateStats) => self.update_stats(item, kernel).await,
            other => Err(ProcessError::Internal(anyhow::anyhow!(
                "scrape lane cannot handle step {other:?}"
            ))),
        }
    }
}

impl ScrapeSourceProcessor {
    async fn fetch_pages(
        &self,
        item: &QueueItem,
        kernel: &WorkerKernel,
    ) -> Result<Outcome, ProcessError> {
        let payload: ScrapeSourcePayload = item.payload_as()?;
        let source = load_source(payload.source_id, kernel).await?;

        if !source.enabled || source.circuit_broken(chrono::Utc::now()) {
            info!(source = %source.id, "source disabled or circuit-broken, skipping scrape");
            return Ok(Outcome::skipped());
        }

        let mut listings: Vec<RawListing> = Vec::new();
        let mut cursor: Option<String> = None;

        // Cursor pagination stays inside one item so the schedule-bucket
        // dedup and the lineage loop guard see a single fetch.
        for _page in 0..MAX_PAGES {
            let request = SourceRequest {
                url: source.url.clone(),
                source_type: source.source_type.as_str().to_string(),
                cursor: cursor.clone(),
            };
            let page = match kernel.scraper.fetch_source(&request).await {
                Ok(page) => page,
                Err(err) => {
                    let failures = JobSource::record_scrape_failure(source.id, &kernel.db_pool)
                        .await
                        .map_err(internal)?;
                    warn!(source = %source.id, failures, error = %err, "source fetch failed");
                    return Err(err.into());
                }
            };

            listings.extend(page.listings);
            cursor = page.next_cursor;
            if cursor.is_none() || listings.len() >= MAX_LISTINGS_PER_SCRAPE {
                break;
            }
        }
        listings.truncate(MAX_LISTINGS_PER_SCRAPE);

        if listings.is_empty() {
            // Nothing on the board: a successful scrape with unchanged tallies
            JobSource::record_scrape_success(source.id, 0, &kernel.db_pool)
                .await
                .map_err(internal)?;
            info!(source = %source.id, "scrape found no listings");
            return Ok(Outcome::success());
        }

        // Raw page markdown is not needed downstream here; the JOB lane
        // re-fetches each listing page itself.
        for listing in &mut listings {
            listing.markdown.clear();
        }

        info!(source = %source.id, found = listings.len(), "scrape fetched listings");
        let next = ScrapeIntakePayload {
            source_id: source.id,
            listings,
        };
        Ok(Outcome::success_with(vec![Submission::new(
            QueueItemType::ScrapeSource,
            QueueStep::Intake,
        )
        .payload(&next)?]))
    }

    async fn intake(&self, item: &QueueItem, kernel: &WorkerKernel) -> Result<Outcome, ProcessError> {
        let payload: ScrapeIntakePayload = item.payload_as()?;
        let found = payload.listings.len() as i64;

        let mut new_jobs = 0i64;
        let mut dedup_hits = 0i64;
        let mut company_names: Vec<String> = Vec::new();

        for listing in &payload.listings {
            match intake::submit_job_url(
                &kernel.queue,
                &listing.url,
                ItemOrigin::AutomatedScan,
                Some(payload.source_id),
            )
            .await
            {
                Ok(result) if result.is_created() => {
                    new_jobs += 1;
                    if let Some(company) = &listing.company_name {
                        let canonical = canonical_company_name(company);
                        if !canonical.is_empty()
                            && !company_names.iter().any(|c| canonical_company_name(c) == canonical)
                        {
                            company_names.push(company.clone());
                        }
                    }
                }
                Ok(_) => dedup_hits += 1,
                Err(ProcessError::Parse(reason)) => {
                    // One malformed URL does not fail the batch
                    warn!(url = %listing.url, reason, "skipping malformed listing URL");
                }
                Err(err) => return Err(err),
            }
        }

        info!(
            source = %payload.source_id,
            found,
            new_jobs,
            dedup_hits,
            "intake complete"
        );

        let mut fan_out = vec![Submission::new(
            QueueItemType::ScrapeSource,
            QueueStep::UpdateStats,
        )
        .payload(&ScrapeStatsPayload {
            source_id: payload.source_id,
            found,
            new_jobs,
        })?];

        if !company_names.is_empty() {
            let discovery = super::company_discovery::CompanyDiscoveryPayload {
                company_names: company_names.into_iter().take(20).collect(),
            };
            fan_out.push(
                Submission::new(QueueItemType::CompanyDiscovery, QueueStep::Probe)
                    .payload(&discovery)?,
            );
        }

        Ok(Outcome::success_with(fan_out))
    }

    async fn update_stats(
        &self,
        item: &QueueItem,
        kernel: &WorkerKernel,
    ) -> Result<Outcome, ProcessError> {
        let payload: ScrapeStatsPayload = item.payload_as()?;
        JobSource::record_scrape_success(payload.source_id, payload.found, &kernel.db_pool)
            .await
            .map_err(internal)?;
        info!(
            source = %payload.source_id,
            found = payload.found,
            new_jobs = payload.new_jobs,
            "source stats updated"
        );
        Ok(Outcome::success())
    }
}

async fn load_source(id: SourceId, kernel: &WorkerKernel) -> Result<JobSource, ProcessError> {
    JobSource::find_by_id(id, &kernel.db_pool)
        .await
        .map_err(internal)?
        .ok_or(ProcessError::NotFound)
}

fn internal(err: sqlx::Error) -> ProcessError {
    crate::kernel::error::from_sqlx(err, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intake_payload_round_trips() {
        let payload = ScrapeIntakePayload {
            source_id: SourceId::new(),
            listings: vec![crate::kernel::test_dependencies::MockScraper::sample_listing(
                "https://example.com/jobs/1",
            )],
        };
        let json = serde_json::to_value(&payload).unwrap();
        let back: ScrapeIntakePayload = serde_json::from_value(json).unwrap();
        assert_eq!(back.listings.len(), 1);
        assert_eq!(back.source_id, payload.source_id);
    }
}
