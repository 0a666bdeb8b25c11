//! Intake: the single doorway for new work.
//!
//! External submissions (UI, REST collaborator, CLI) and internal fan-in
//! (scraped listings) all land here, get normalized, and become deduplicated
//! root queue items. Every JOB lineage in the system starts in this module.

use anyhow::Result;
use chrono::Utc;
use sqlx::PgPool;
use tracing::info;

use crate::common::{normalize_url, SourceId};
use crate::domains::processors::company::CompanyPayload;
use crate::domains::processors::job::JobPayload;
use crate::domains::processors::scrape_source::ScrapeSourcePayload;
use crate::domains::sources::JobSource;
use crate::kernel::error::ProcessError;
use crate::kernel::queue::{
    DedupKey, EnqueueResult, ItemOrigin, QueueItemType, QueueManager, QueueStep, Submission,
};

/// Submit a job listing URL. Returns the queue item id either way; a
/// duplicate of active work returns the existing lineage's root.
pub async fn submit_job_url(
    queue: &QueueManager,
    url: &str,
    origin: ItemOrigin,
    source_id: Option<SourceId>,
) -> Result<EnqueueResult, ProcessError> {
    let normalized =
        normalize_url(url).map_err(|e| ProcessError::Parse(format!("bad URL: {e}")))?;

    let payload = JobPayload {
        url: normalized.clone(),
        listing_id: None,
        source_id,
    };
    let result = queue
        .submit(
            Submission::new(QueueItemType::Job, QueueStep::Fetch)
                .url(normalized.clone())
                .origin(origin)
                .dedup(DedupKey::Job {
                    url_normalized: normalized.clone(),
                })
                .payload(&payload)?,
        )
        .await?;

    info!(
        url = %normalized,
        item = %result.item_id(),
        created = result.is_created(),
        "job URL submitted"
    );
    Ok(result)
}

/// Submit a company for research.
pub async fn submit_company(
    queue: &QueueManager,
    name: &str,
    website: Option<&str>,
) -> Result<EnqueueResult, ProcessError> {
    if name.trim().is_empty() {
        return Err(ProcessError::Parse("company name is empty".to_string()));
    }

    let website = website
        .map(|w| normalize_url(w).map_err(|e| ProcessError::Parse(format!("bad URL: {e}"))))
        .transpose()?;

    let payload = CompanyPayload {
        name: name.trim().to_string(),
        canonical_name: crate::common::canonical_company_name(name),
        website,
        page_markdown: None,
        career_urls: Vec::new(),
    };
    let result = queue
        .submit(
            Submission::new(QueueItemType::Company, QueueStep::Fetch)
                .origin(ItemOrigin::UserSubmission)
                .dedup(DedupKey::Company {
                    canonical_name: payload.canonical_name.clone(),
                })
                .payload(&payload)?,
        )
        .await?;

    info!(company = %payload.canonical_name, item = %result.item_id(), "company submitted");
    Ok(result)
}

/// Register (or update) a source record.
pub async fn submit_source(pool: &PgPool, source: JobSource) -> Result<JobSource, ProcessError> {
    let stored = source
        .upsert_by_url(pool)
        .await
        .map_err(|e| crate::kernel::error::from_sqlx(e, None))?;
    info!(source = %stored.id, url = %stored.url, "source registered");
    Ok(stored)
}

/// Enqueue a scrape of one source, deduplicated per schedule bucket (one
/// scrape per source per hour).
pub async fn trigger_scrape(
    queue: &QueueManager,
    source_id: SourceId,
    origin: ItemOrigin,
) -> Result<EnqueueResult, ProcessError> {
    let payload = ScrapeSourcePayload { source_id };
    queue
        .submit(
            Submission::new(QueueItemType::ScrapeSource, QueueStep::FetchPage)
                .origin(origin)
                .dedup(DedupKey::ScrapeSource {
                    source_id,
                    bucket: DedupKey::scrape_bucket(Utc::now()),
                })
                .payload(&payload)?,
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::kernel::queue::{MemoryQueueStore, QueueItemStatus, QueueStore};

    fn queue() -> (Arc<MemoryQueueStore>, QueueManager) {
        let store = Arc::new(MemoryQueueStore::new());
        let mgr = QueueManager::new(store.clone() as Arc<dyn QueueStore>);
        (store, mgr)
    }

    #[tokio::test]
    async fn submitted_url_is_normalized_before_dedup() {
        let (store, mgr) = queue();

        let first = submit_job_url(
            &mgr,
            "https://Example.com/jobs/abc?utm_source=feed",
            ItemOrigin::UserSubmission,
            None,
        )
        .await
        .unwrap();
        let second = submit_job_url(
            &mgr,
            "example.com/jobs/abc/",
            ItemOrigin::UserSubmission,
            None,
        )
        .await
        .unwrap();

        assert!(first.is_created());
        assert!(!second.is_created(), "same listing after normalization");
        assert_eq!(first.item_id(), second.item_id());
        assert_eq!(store.all().len(), 1);
    }

    #[tokio::test]
    async fn submitted_item_is_a_pending_root() {
        let (store, mgr) = queue();
        let result = submit_job_url(
            &mgr,
            "https://example.com/jobs/abc",
            ItemOrigin::UserSubmission,
            None,
        )
        .await
        .unwrap();

        let item = store.get(result.item_id()).unwrap();
        assert_eq!(item.status, QueueItemStatus::Pending);
        assert_eq!(item.root_id, item.id);
        assert_eq!(item.depth, 0);
        assert!(item.parent_id.is_none());
    }

    #[tokio::test]
    async fn garbage_url_is_a_parse_error() {
        let (_store, mgr) = queue();
        let err = submit_job_url(&mgr, "http://", ItemOrigin::UserSubmission, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Parse(_)));
    }

    #[tokio::test]
    async fn company_names_dedup_canonically() {
        let (store, mgr) = queue();
        let first = submit_company(&mgr, "Acme, Inc.", None).await.unwrap();
        let second = submit_company(&mgr, "ACME INC", None).await.unwrap();

        assert!(first.is_created());
        assert!(!second.is_created());
        assert_eq!(store.all().len(), 1);
    }

    #[tokio::test]
    async fn empty_company_name_is_rejected() {
        let (_store, mgr) = queue();
        assert!(matches!(
            submit_company(&mgr, "  ", None).await.unwrap_err(),
            ProcessError::Parse(_)
        ));
    }

    #[tokio::test]
    async fn scrape_triggers_dedup_within_the_hour_bucket() {
        let (store, mgr) = queue();
        let source_id = SourceId::new();

        let first = trigger_scrape(&mgr, source_id, ItemOrigin::Scheduled).await.unwrap();
        let second = trigger_scrape(&mgr, source_id, ItemOrigin::Scheduled).await.unwrap();
        assert!(first.is_created());
        assert!(!second.is_created());

        // A different source is its own bucket
        let other = trigger_scrape(&mgr, SourceId::new(), ItemOrigin::Scheduled)
            .await
            .unwrap();
        assert!(other.is_created());
        assert_eq!(store.all().len(), 2);
    }
}
