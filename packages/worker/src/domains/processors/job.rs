//! JOB lane: fetch → extract → filter → analyze → save.
//!
//! One listing URL walks the whole lane as a single lineage; each step is
//! its own queue item so a crash resumes at the failed step, not the start.
//! Every write is keyed on the listing's normalized URL or id, making
//! replays of any step idempotent.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{Outcome, Processor};
use crate::common::{normalize_url, ListingId, SourceId};
use crate::domains::companies::Company;
use crate::domains::extraction;
use crate::domains::filter::{self, MatchAnalysis};
use crate::domains::listings::{JobListing, JobMatch, ListingStatus, MatchPriority};
use crate::domains::sources::JobSource;
use crate::kernel::config::{CandidateProfile, EnrichOnSave, MatchPolicy, PrefilterPolicy};
use crate::kernel::error::ProcessError;
use crate::kernel::queue::{DedupKey, QueueItem, QueueItemType, QueueStep, Submission};
use crate::kernel::WorkerKernel;

/// Payload carried by every JOB step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub url: String,
    #[serde(default)]
    pub listing_id: Option<ListingId>,
    #[serde(default)]
    pub source_id: Option<SourceId>,
}

/// SAVE carries the analysis forward so the verdict survives a crash
/// between analyze and save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSavePayload {
    pub url: String,
    pub listing_id: ListingId,
    #[serde(default)]
    pub source_id: Option<SourceId>,
    pub analysis: MatchAnalysis,
}

pub struct JobProcessor;

#[async_trait]
impl Processor for JobProcessor {
    fn item_type(&self) -> QueueItemType {
        QueueItemType::Job
    }

    async fn process(
        &self,
        item: &QueueItem,
        kernel: &WorkerKernel,
    ) -> Result<Outcome, ProcessError> {
        match item.step {
            Some(QueueStep::Fetch) => self.fetch(item, kernel).await,
            Some(QueueStep::Extract) => self.extract(item, kernel).await,
            Some(QueueStep::Filter) => self.filter(item, kernel).await,
            Some(QueueStep::Analyze) => self.analyze(item, kernel).await,
            Some(QueueStep::Save) => self.save(item, kernel).await,
            other => Err(ProcessError::Internal(anyhow::anyhow!(
                "job lane cannot handle step {other:?}"
            ))),
        }
    }
}

impl JobProcessor {
    async fn fetch(&self, item: &QueueItem, kernel: &WorkerKernel) -> Result<Outcome, ProcessError> {
        let payload: JobPayload = item.payload_as()?;
        let url = normalize_url(&payload.url)
            .map_err(|e| ProcessError::Parse(format!("bad listing URL: {e}")))?;

        let raw = match kernel.scraper.fetch_listing(&url).await {
            Ok(raw) => raw,
            Err(err) => {
                let process_err = ProcessError::from(err);
                if process_err.is_terminal_skip() {
                    // Dead URL: reflect it on any listing row we already have
                    if let Some(listing) = JobListing::find_by_url(&url, &kernel.db_pool)
                        .await
                        .map_err(internal)?
                    {
                        let _ = JobListing::advance_status(
                            listing.id,
                            listing.status,
                            ListingStatus::Skipped,
                            &kernel.db_pool,
                        )
                        .await;
                    }
                }
                return Err(process_err);
            }
        };

        let mut listing = JobListing::builder()
            .url_normalized(raw.url.clone())
            .title(raw.title.clone().unwrap_or_else(|| "(untitled)".to_string()))
            .company_name(raw.company_name.clone().unwrap_or_default())
            .description(raw.markdown.clone())
            .build();
        listing.source_id = payload.source_id;
        listing.location = raw.location.clone();
        listing.salary_range = raw.salary_range.clone();
        listing.posted_date = raw.posted_date;

        let stored = listing.upsert_by_url(&kernel.db_pool).await.map_err(internal)?;
        info!(listing = %stored.id, url = %stored.url_normalized, "listing fetched");

        let next = JobPayload {
            url: stored.url_normalized.clone(),
            listing_id: Some(stored.id),
            source_id: payload.source_id,
        };
        Ok(Outcome::success_with(vec![job_step(
            QueueStep::Extract,
            &next,
        )?]))
    }

    async fn extract(
        &self,
        item: &QueueItem,
        kernel: &WorkerKernel,
    ) -> Result<Outcome, ProcessError> {
        let payload: JobPayload = item.payload_as()?;
        let mut listing = load_listing(&payload, kernel).await?;

        if listing.status.is_terminal() {
            // Replay after the lane already finished elsewhere
            return Ok(Outcome::success());
        }

        // Raw fields that already fail the pre-filter skip the extraction
        // call entirely; FILTER will record the rejection.
        let prefilter_policy: PrefilterPolicy = kernel.config.get().await;
        if !filter::prefilter(&listing, &prefilter_policy, Utc::now()).pass {
            let next = JobPayload {
                url: listing.url_normalized.clone(),
                listing_id: Some(listing.id),
                source_id: payload.source_id,
            };
            return Ok(Outcome::success_with(vec![job_step(QueueStep::Filter, &next)?]));
        }

        let extracted =
            extraction::extract_listing(&kernel.agents, &listing.url_normalized, &listing.description)
                .await?;

        listing.title = extracted.title;
        listing.company_name = extracted.company_name;
        listing.location = extracted.location.or(listing.location);
        listing.salary_range = extracted.salary_range.or(listing.salary_range);
        listing.posted_date = extracted.posted_date.or(listing.posted_date);
        if let Some(description) = extracted.description {
            listing.description = description;
        }
        let stored = listing.upsert_by_url(&kernel.db_pool).await.map_err(internal)?;

        let next = JobPayload {
            url: stored.url_normalized.clone(),
            listing_id: Some(stored.id),
            source_id: payload.source_id,
        };
        Ok(Outcome::success_with(vec![job_step(QueueStep::Filter, &next)?]))
    }

    async fn filter(
        &self,
        item: &QueueItem,
        kernel: &WorkerKernel,
    ) -> Result<Outcome, ProcessError> {
        let payload: JobPayload = item.payload_as()?;
        let listing = load_listing(&payload, kernel).await?;

        if listing.status.is_terminal() {
            return Ok(Outcome::success());
        }

        let policy: PrefilterPolicy = kernel.config.get().await;
        let verdict = filter::prefilter(&listing, &policy, Utc::now());

        JobListing::set_filter_result(listing.id, &verdict.to_json(), &kernel.db_pool)
            .await
            .map_err(internal)?;

        if !verdict.pass {
            info!(listing = %listing.id, reasons = ?verdict.reasons, "pre-filter rejected listing");
            JobListing::advance_status(
                listing.id,
                ListingStatus::Pending,
                ListingStatus::Filtered,
                &kernel.db_pool,
            )
            .await
            .map_err(internal)?;
            return Ok(Outcome::filtered());
        }

        JobListing::advance_status(
            listing.id,
            ListingStatus::Pending,
            ListingStatus::Analyzing,
            &kernel.db_pool,
        )
        .await
        .map_err(internal)?;

        let next = JobPayload {
            url: listing.url_normalized.clone(),
            listing_id: Some(listing.id),
            source_id: payload.source_id,
        };
        Ok(Outcome::success_with(vec![job_step(QueueStep::Analyze, &next)?]))
    }

    async fn analyze(
        &self,
        item: &QueueItem,
        kernel: &WorkerKernel,
    ) -> Result<Outcome, ProcessError> {
        let payload: JobPayload = item.payload_as()?;
        let listing = load_listing(&payload, kernel).await?;

        if listing.status.is_terminal() {
            return Ok(Outcome::success());
        }

        let profile: CandidateProfile = kernel.config.get().await;
        let policy: MatchPolicy = kernel.config.get().await;

        let analysis = match filter::analyze(&kernel.agents, &listing, &profile, &policy).await {
            Ok(analysis) => analysis,
            Err(err @ ProcessError::Transient(_)) if item.attempts >= item.max_attempts => {
                // Out of retries on a model that will not produce valid
                // shape: close the listing out with a zero score instead of
                // losing it to FAILED.
                warn!(listing = %listing.id, error = %err, "analysis exhausted, saving zero-score match");
                return self
                    .persist_match(item, kernel, &listing, zero_score_analysis(&err), &policy)
                    .await;
            }
            Err(err) => return Err(err),
        };

        if analysis.match_score < policy.min_score_to_save {
            info!(
                listing = %listing.id,
                score = analysis.match_score,
                threshold = policy.min_score_to_save,
                "score below threshold, skipping"
            );
            JobListing::advance_status(
                listing.id,
                ListingStatus::Analyzing,
                ListingStatus::Skipped,
                &kernel.db_pool,
            )
            .await
            .map_err(internal)?;
            return Ok(Outcome::skipped());
        }

        let save = JobSavePayload {
            url: listing.url_normalized.clone(),
            listing_id: listing.id,
            source_id: payload.source_id,
            analysis,
        };
        Ok(Outcome::success_with(vec![Submission::new(
            QueueItemType::Job,
            QueueStep::Save,
        )
        .url(save.url.clone())
        .dedup(DedupKey::Job {
            url_normalized: save.url.clone(),
        })
        .payload(&save)?]))
    }

    async fn save(&self, item: &QueueItem, kernel: &WorkerKernel) -> Result<Outcome, ProcessError> {
        let payload: JobSavePayload = item.payload_as()?;
        let listing = JobListing::find_by_id(payload.listing_id, &kernel.db_pool)
            .await
            .map_err(internal)?
            .ok_or_else(|| {
                ProcessError::Internal(anyhow::anyhow!(
                    "listing {} vanished before save",
                    payload.listing_id
                ))
            })?;

        let policy: MatchPolicy = kernel.config.get().await;
        self.persist_match(item, kernel, &listing, payload.analysis, &policy)
            .await
    }

    /// Upsert the match, finish the listing, and decide enrichment fan-out.
    async fn persist_match(
        &self,
        item: &QueueItem,
        kernel: &WorkerKernel,
        listing: &JobListing,
        analysis: MatchAnalysis,
        policy: &MatchPolicy,
    ) -> Result<Outcome, ProcessError> {
        let mut job_match = JobMatch::builder()
            .job_listing_id(listing.id)
            .match_score(analysis.match_score)
            .matched_skills(analysis.matched_skills.clone())
            .missing_skills(analysis.missing_skills.clone())
            .match_reasons(analysis.match_reasons.clone())
            .key_strengths(analysis.key_strengths.clone())
            .potential_concerns(analysis.potential_concerns.clone())
            .experience_match(analysis.experience_match)
            .application_priority(analysis.application_priority)
            .customization_recommendations(analysis.customization_recommendations.clone())
            .queue_item_id(item.id)
            .build();
        job_match.resume_intake = analysis.resume_intake.clone();

        job_match.upsert_for_listing(&kernel.db_pool).await.map_err(internal)?;

        JobListing::advance_status(
            listing.id,
            ListingStatus::Analyzing,
            ListingStatus::Analyzed,
            &kernel.db_pool,
        )
        .await
        .map_err(internal)?;

        if let Some(source_id) = listing.source_id {
            JobSource::record_matches(source_id, 1, &kernel.db_pool)
                .await
                .map_err(internal)?;
        }

        info!(
            listing = %listing.id,
            score = analysis.match_score,
            priority = ?analysis.application_priority,
            "match saved"
        );

        let enrich = match policy.enrich_on_save {
            EnrichOnSave::Never => false,
            EnrichOnSave::Always => true,
            EnrichOnSave::HighPriority => {
                analysis.application_priority == MatchPriority::High
            }
        };
        if !enrich || listing.company_name.trim().is_empty() {
            return Ok(Outcome::success());
        }

        let company = Company::from_name(&listing.company_name);
        let enrich_payload = super::company::CompanyPayload {
            name: company.name.clone(),
            canonical_name: company.canonical_name.clone(),
            website: None,
            page_markdown: None,
            career_urls: Vec::new(),
        };
        Ok(Outcome::success_with(vec![Submission::new(
            QueueItemType::Company,
            QueueStep::Fetch,
        )
        .dedup(DedupKey::Company {
            canonical_name: company.canonical_name.clone(),
        })
        .payload(&enrich_payload)?]))
    }
}

/// Build the standard next-step submission for the job lane.
fn job_step(step: QueueStep, payload: &JobPayload) -> Result<Submission, ProcessError> {
    Ok(Submission::new(QueueItemType::Job, step)
        .url(payload.url.clone())
        .dedup(DedupKey::Job {
            url_normalized: payload.url.clone(),
        })
        .payload(payload)?)
}

async fn load_listing(payload: &JobPayload, kernel: &WorkerKernel) -> Result<JobListing, ProcessError> {
    let listing = match payload.listing_id {
        Some(id) => JobListing::find_by_id(id, &kernel.db_pool).await.map_err(internal)?,
        None => JobListing::find_by_url(&payload.url, &kernel.db_pool)
            .await
            .map_err(internal)?,
    };
    listing.ok_or_else(|| {
        ProcessError::Internal(anyhow::anyhow!("no listing for {}", payload.url))
    })
}

fn zero_score_analysis(err: &ProcessError) -> MatchAnalysis {
    MatchAnalysis {
        match_score: 0,
        matched_skills: Vec::new(),
        missing_skills: Vec::new(),
        match_reasons: Vec::new(),
        key_strengths: Vec::new(),
        potential_concerns: vec![format!("analysis failed: {err}")],
        experience_match: 0,
        application_priority: MatchPriority::Low,
        customization_recommendations: Vec::new(),
        resume_intake: None,
    }
}

fn internal(err: sqlx::Error) -> ProcessError {
    crate::kernel::error::from_sqlx(err, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_payload_round_trips_through_item_payload() {
        let payload = JobPayload {
            url: "https://example.com/jobs/1".to_string(),
            listing_id: Some(ListingId::new()),
            source_id: None,
        };
        let submission = job_step(QueueStep::Extract, &payload).unwrap();
        let back: JobPayload = serde_json::from_value(submission.payload).unwrap();
        assert_eq!(back.url, payload.url);
        assert_eq!(back.listing_id, payload.listing_id);
    }

    #[test]
    fn each_lane_step_keeps_the_same_dedup_url() {
        let payload = JobPayload {
            url: "https://example.com/jobs/1".to_string(),
            listing_id: None,
            source_id: None,
        };
        let a = job_step(QueueStep::Extract, &payload).unwrap();
        let b = job_step(QueueStep::Filter, &payload).unwrap();
        // Same URL, different step → different dedup keys
        let ka = a.dedup.unwrap().idempotency_key(QueueItemType::Job, a.step);
        let kb = b.dedup.unwrap().idempotency_key(QueueItemType::Job, b.step);
        assert_ne!(ka, kb);
    }

    #[test]
    fn zero_score_fallback_is_low_priority_with_audit_trail() {
        let analysis = zero_score_analysis(&ProcessError::Transient("bad shape".into()));
        assert_eq!(analysis.match_score, 0);
        assert_eq!(analysis.application_priority, MatchPriority::Low);
        assert!(analysis.potential_concerns[0].contains("bad shape"));
    }
}
