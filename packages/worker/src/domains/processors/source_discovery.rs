//! SOURCE_DISCOVERY lane: probe candidate endpoints for a company and
//! register the ones that actually serve listings as job sources.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Outcome, Processor};
use crate::common::{normalize_url, CompanyId};
use crate::domains::sources::{JobSource, SourceType};
use crate::kernel::error::ProcessError;
use crate::kernel::queue::{QueueItem, QueueItemType, QueueStep};
use crate::kernel::scrape::SourceRequest;
use crate::kernel::WorkerKernel;

/// Endpoints probed per item.
const MAX_PROBES: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDiscoveryPayload {
    #[serde(default)]
    pub company_id: Option<CompanyId>,
    pub company_name: String,
    pub candidate_urls: Vec<String>,
}

pub struct SourceDiscoveryProcessor;

#[async_trait]
impl Processor for SourceDiscoveryProcessor {
    fn item_type(&self) -> QueueItemType {
        QueueItemType::SourceDiscovery
    }

    async fn process(
        &self,
        item: &QueueItem,
        kernel: &WorkerKernel,
    ) -> Result<Outcome, ProcessError> {
        if item.step != Some(QueueStep::Probe) {
            return Err(ProcessError::Internal(anyhow::anyhow!(
                "source discovery cannot handle step {:?}",
                item.step
            )));
        }
        let payload: SourceDiscoveryPayload = item.payload_as()?;

        let mut registered = 0usize;
        for candidate in payload.candidate_urls.iter().take(MAX_PROBES) {
            let Ok(url) = normalize_url(candidate) else {
                debug!(candidate, "skipping unparseable candidate URL");
                continue;
            };
            let source_type = classify_source(&url);

            let request = SourceRequest {
                url: url.clone(),
                source_type: source_type.as_str().to_string(),
                cursor: None,
            };
            match kernel.scraper.fetch_source(&request).await {
                Ok(page) if !page.listings.is_empty() => {
                    let mut source = JobSource::builder()
                        .name(format!("{} careers", payload.company_name))
                        .url(url.clone())
                        .source_type(source_type)
                        .build();
                    source.company_id = payload.company_id;
                    source
                        .upsert_by_url(&kernel.db_pool)
                        .await
                        .map_err(|e| crate::kernel::error::from_sqlx(e, None))?;
                    registered += 1;
                    info!(url = %url, kind = source_type.as_str(), "registered job source");
                }
                Ok(_) => {
                    debug!(url = %url, "candidate serves no listings");
                }
                Err(err) => {
                    // A dead candidate is expected; only the probe fails, not
                    // the item.
                    warn!(url = %url, error = %err, "candidate probe failed");
                }
            }
        }

        info!(
            company = %payload.company_name,
            probed = payload.candidate_urls.len().min(MAX_PROBES),
            registered,
            "source discovery finished"
        );
        Ok(Outcome::success())
    }
}

/// Classify a careers endpoint by its URL shape.
fn classify_source(url: &str) -> SourceType {
    let lower = url.to_lowercase();
    if lower.contains("greenhouse.io") {
        SourceType::Greenhouse
    } else if lower.contains("lever.co") {
        SourceType::Lever
    } else if lower.contains("myworkday") || lower.contains("workday") {
        SourceType::Workday
    } else if lower.contains("/rss") || lower.contains("/feed") || lower.ends_with(".xml") {
        SourceType::Rss
    } else if lower.contains("/api/") {
        SourceType::Api
    } else if lower.contains("/careers") || lower.contains("/jobs") {
        SourceType::CompanyPage
    } else {
        SourceType::Html
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_ats_vendors() {
        assert_eq!(
            classify_source("https://boards.greenhouse.io/acme"),
            SourceType::Greenhouse
        );
        assert_eq!(classify_source("https://jobs.lever.co/acme"), SourceType::Lever);
        assert_eq!(
            classify_source("https://acme.wd1.myworkdayjobs.com/External"),
            SourceType::Workday
        );
    }

    #[test]
    fn classifies_feeds_and_pages() {
        assert_eq!(classify_source("https://acme.example/jobs/feed"), SourceType::Rss);
        assert_eq!(classify_source("https://acme.example/jobs.xml"), SourceType::Rss);
        assert_eq!(
            classify_source("https://acme.example/careers"),
            SourceType::CompanyPage
        );
        assert_eq!(classify_source("https://acme.example/work-with-us"), SourceType::Html);
    }
}
