//! COMPANY lane: fetch → extract → enrich → discover_sources.
//!
//! Research a company behind a saved match: scrape its site, structure the
//! facts, merge them into the company record, and optionally hand candidate
//! career pages to source discovery.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Outcome, Processor};
use crate::domains::companies::{Company, CompanyTier};
use crate::domains::extraction::{self, ExtractedCompany};
use crate::kernel::config::CandidateProfile;
use crate::kernel::error::ProcessError;
use crate::kernel::queue::{DedupKey, QueueItem, QueueItemType, QueueStep, Submission};
use crate::kernel::WorkerKernel;

/// Page content carried between steps is capped; company pages can be huge.
const PAGE_MARKDOWN_CAP: usize = 20_000;
/// Candidate career URLs handed to discovery per company.
const MAX_CAREER_URLS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyPayload {
    pub name: String,
    pub canonical_name: String,
    #[serde(default)]
    pub website: Option<String>,
    /// Scraped page content, present from EXTRACT onward.
    #[serde(default)]
    pub page_markdown: Option<String>,
    /// Candidate career pages, present on DISCOVER_SOURCES.
    #[serde(default)]
    pub career_urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyEnrichPayload {
    pub name: String,
    pub canonical_name: String,
    pub facts: ExtractedCompany,
}

pub struct CompanyProcessor;

#[async_trait]
impl Processor for CompanyProcessor {
    fn item_type(&self) -> QueueItemType {
        QueueItemType::Company
    }

    async fn process(
        &self,
        item: &QueueItem,
        kernel: &WorkerKernel,
    ) -> Result<Outcome, ProcessError> {
        match item.step {
            Some(QueueStep::Fetch) => self.fetch(item, kernel).await,
            Some(QueueStep::Extract) => self.extract(item, kernel).await,
            Some(QueueStep::Enrich) => self.enrich(item, kernel).await,
            Some(QueueStep::DiscoverSources) => self.discover_sources(item, kernel).await,
            other => Err(ProcessError::Internal(anyhow::anyhow!(
                "company lane cannot handle step {other:?}"
            ))),
        }
    }
}

impl CompanyProcessor {
    async fn fetch(&self, item: &QueueItem, kernel: &WorkerKernel) -> Result<Outcome, ProcessError> {
        let payload: CompanyPayload = item.payload_as()?;

        let mut company = Company::from_name(&payload.name);
        company.website = payload.website.clone();
        let company = company
            .upsert_by_canonical_name(&kernel.db_pool)
            .await
            .map_err(|e| crate::kernel::error::from_sqlx(e, None))?;

        let Some(website) = company.website.clone().or(payload.website.clone()) else {
            // Nothing to scrape; the record exists, the lane ends here.
            debug!(company = %company.id, "no website known, enrichment ends");
            return Ok(Outcome::success());
        };

        let page = kernel.scraper.fetch_listing(&website).await?;
        let mut markdown = page.markdown;
        crate::common::truncate_lossy(&mut markdown, PAGE_MARKDOWN_CAP);

        let next = CompanyPayload {
            name: company.name.clone(),
            canonical_name: company.canonical_name.clone(),
            website: Some(website),
            page_markdown: Some(markdown),
            career_urls: Vec::new(),
        };
        Ok(Outcome::success_with(vec![Submission::new(
            QueueItemType::Company,
            QueueStep::Extract,
        )
        .dedup(DedupKey::Company {
            canonical_name: next.canonical_name.clone(),
        })
        .payload(&next)?]))
    }

    async fn extract(
        &self,
        item: &QueueItem,
        kernel: &WorkerKernel,
    ) -> Result<Outcome, ProcessError> {
        let payload: CompanyPayload = item.payload_as()?;
        let markdown = payload
            .page_markdown
            .as_deref()
            .ok_or_else(|| ProcessError::Parse("extract step without page content".to_string()))?;

        let mut facts = extraction::extract_company(&kernel.agents, &payload.name, markdown).await?;
        facts.website = facts.website.or(payload.website.clone());
        facts.career_urls.truncate(MAX_CAREER_URLS);

        let next = CompanyEnrichPayload {
            name: payload.name.clone(),
            canonical_name: payload.canonical_name.clone(),
            facts,
        };
        Ok(Outcome::success_with(vec![Submission::new(
            QueueItemType::Company,
            QueueStep::Enrich,
        )
        .dedup(DedupKey::Company {
            canonical_name: next.canonical_name.clone(),
        })
        .payload(&next)?]))
    }

    async fn enrich(&self, item: &QueueItem, kernel: &WorkerKernel) -> Result<Outcome, ProcessError> {
        let payload: CompanyEnrichPayload = item.payload_as()?;
        let profile: CandidateProfile = kernel.config.get().await;

        let (tier, priority_score) = rate_company(&payload.facts.tech_stack, &profile);

        let mut company = Company::from_name(&payload.name);
        company.website = payload.facts.website.clone();
        company.about = payload.facts.about.clone();
        company.tech_stack = payload.facts.tech_stack.clone();
        company.tier = tier;
        company.priority_score = priority_score;
        company.enrichment = Some(serde_json::to_value(&payload.facts).map_err(anyhow::Error::from)?);
        company.enriched_at = Some(Utc::now());

        let stored = company
            .upsert_by_canonical_name(&kernel.db_pool)
            .await
            .map_err(|e| crate::kernel::error::from_sqlx(e, None))?;

        info!(
            company = %stored.id,
            tier = ?stored.tier,
            priority = stored.priority_score,
            "company enriched"
        );

        if payload.facts.career_urls.is_empty() {
            return Ok(Outcome::success());
        }

        let next = CompanyPayload {
            name: payload.name.clone(),
            canonical_name: payload.canonical_name.clone(),
            website: payload.facts.website.clone(),
            page_markdown: None,
            career_urls: payload.facts.career_urls.clone(),
        };
        Ok(Outcome::success_with(vec![Submission::new(
            QueueItemType::Company,
            QueueStep::DiscoverSources,
        )
        .dedup(DedupKey::Company {
            canonical_name: payload.canonical_name.clone(),
        })
        .payload(&next)?]))
    }

    async fn discover_sources(
        &self,
        item: &QueueItem,
        kernel: &WorkerKernel,
    ) -> Result<Outcome, ProcessError> {
        let payload: CompanyPayload = item.payload_as()?;
        if payload.career_urls.is_empty() {
            return Ok(Outcome::success());
        }

        let company = Company::find_by_canonical_name(&payload.canonical_name, &kernel.db_pool)
            .await
            .map_err(|e| crate::kernel::error::from_sqlx(e, None))?;

        let probe = super::source_discovery::SourceDiscoveryPayload {
            company_id: company.map(|c| c.id),
            company_name: payload.name.clone(),
            candidate_urls: payload.career_urls.clone(),
        };
        Ok(Outcome::success_with(vec![Submission::new(
            QueueItemType::SourceDiscovery,
            QueueStep::Probe,
        )
        .dedup(DedupKey::Company {
            canonical_name: payload.canonical_name.clone(),
        })
        .payload(&probe)?]))
    }
}

/// Tier and priority from tech overlap with the candidate's skills.
fn rate_company(tech_stack: &[String], profile: &CandidateProfile) -> (CompanyTier, i32) {
    let have: Vec<String> = profile.skills.iter().map(|s| s.to_lowercase()).collect();
    let overlap = tech_stack
        .iter()
        .filter(|t| have.contains(&t.to_lowercase()))
        .count() as i32;

    let tier = match overlap {
        0 => CompanyTier::C,
        1..=2 => CompanyTier::B,
        3..=4 => CompanyTier::A,
        _ => CompanyTier::S,
    };
    (tier, overlap * 10)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(skills: &[&str]) -> CandidateProfile {
        CandidateProfile {
            skills: skills.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn stack(techs: &[&str]) -> Vec<String> {
        techs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn tier_tracks_tech_overlap() {
        let p = profile(&["rust", "postgresql", "kubernetes", "terraform", "grafana"]);
        assert_eq!(rate_company(&stack(&[]), &p).0, CompanyTier::C);
        assert_eq!(rate_company(&stack(&["Rust"]), &p).0, CompanyTier::B);
        assert_eq!(
            rate_company(&stack(&["Rust", "PostgreSQL", "Kubernetes"]), &p).0,
            CompanyTier::A
        );
        assert_eq!(
            rate_company(
                &stack(&["Rust", "PostgreSQL", "Kubernetes", "Terraform", "Grafana"]),
                &p
            )
            .0,
            CompanyTier::S
        );
    }

    #[test]
    fn priority_score_is_ten_per_overlap() {
        let p = profile(&["rust", "go"]);
        let (_, score) = rate_company(&stack(&["Rust", "Go", "COBOL"]), &p);
        assert_eq!(score, 20);
    }
}
