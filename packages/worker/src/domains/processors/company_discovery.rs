//! COMPANY_DISCOVERY lane: turn company names seen during scrapes into
//! research lineages for companies we have never looked at.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Outcome, Processor};
use crate::common::canonical_company_name;
use crate::domains::companies::Company;
use crate::kernel::error::ProcessError;
use crate::kernel::queue::{DedupKey, ItemOrigin, QueueItem, QueueItemType, QueueStep, Submission};
use crate::kernel::WorkerKernel;

/// Companies researched per discovery item.
const MAX_NEW_COMPANIES: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyDiscoveryPayload {
    pub company_names: Vec<String>,
}

pub struct CompanyDiscoveryProcessor;

#[async_trait]
impl Processor for CompanyDiscoveryProcessor {
    fn item_type(&self) -> QueueItemType {
        QueueItemType::CompanyDiscovery
    }

    async fn process(
        &self,
        item: &QueueItem,
        kernel: &WorkerKernel,
    ) -> Result<Outcome, ProcessError> {
        if item.step != Some(QueueStep::Probe) {
            return Err(ProcessError::Internal(anyhow::anyhow!(
                "company discovery cannot handle step {:?}",
                item.step
            )));
        }
        let payload: CompanyDiscoveryPayload = item.payload_as()?;

        // Each new company becomes its own root lineage: a lineage's
        // (type, step) tuples are unique, so sibling research lanes cannot
        // live under this item.
        let mut researching = 0usize;
        for name in &payload.company_names {
            if researching >= MAX_NEW_COMPANIES {
                break;
            }
            let canonical = canonical_company_name(name);
            if canonical.is_empty() {
                continue;
            }

            let known = Company::find_by_canonical_name(&canonical, &kernel.db_pool)
                .await
                .map_err(|e| crate::kernel::error::from_sqlx(e, None))?;
            if known.is_some_and(|c| c.enriched_at.is_some()) {
                debug!(company = %canonical, "already researched, skipping");
                continue;
            }

            let company_payload = super::company::CompanyPayload {
                name: name.trim().to_string(),
                canonical_name: canonical.clone(),
                website: None,
                page_markdown: None,
                career_urls: Vec::new(),
            };
            let result = kernel
                .queue
                .submit(
                    Submission::new(QueueItemType::Company, QueueStep::Fetch)
                        .origin(ItemOrigin::AutomatedScan)
                        .dedup(DedupKey::Company {
                            canonical_name: canonical,
                        })
                        .payload(&company_payload)?,
                )
                .await?;
            if result.is_created() {
                researching += 1;
            }
        }

        info!(
            seen = payload.company_names.len(),
            researching,
            "company discovery finished"
        );
        Ok(Outcome::success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trips() {
        let payload = CompanyDiscoveryPayload {
            company_names: vec!["Acme, Inc.".to_string(), "Globex".to_string()],
        };
        let json = serde_json::to_value(&payload).unwrap();
        let back: CompanyDiscoveryPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back.company_names.len(), 2);
    }
}
