//! LLM-backed field extraction from scraped pages.

use serde::{Deserialize, Serialize};

use crate::kernel::agent::{AgentManager, LlmRequestExt};
use crate::kernel::error::ProcessError;

/// Scope name for extraction calls (budget and disable decisions).
pub const EXTRACTION_SCOPE: &str = "worker/extraction";

/// Structured fields pulled out of a listing page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedListing {
    pub title: String,
    pub company_name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub salary_range: Option<String>,
    #[serde(default)]
    pub posted_date: Option<chrono::NaiveDate>,
    /// Cleaned description, markdown.
    #[serde(default)]
    pub description: Option<String>,
}

const LISTING_SCHEMA_HINT: &str = r#"{
  "title": "...",
  "company_name": "...",
  "location": "... or null",
  "salary_range": "... or null",
  "posted_date": "YYYY-MM-DD or null",
  "description": "cleaned markdown or null"
}"#;

/// Extract listing fields from page markdown.
///
/// Mandatory fields missing from the page surface as `Parse`, which the
/// queue retries a couple of times before failing the step.
pub async fn extract_listing(
    agents: &AgentManager,
    url: &str,
    markdown: &str,
) -> Result<ExtractedListing, ProcessError> {
    let extracted: ExtractedListing = agents
        .request(EXTRACTION_SCOPE)
        .system(
            "You extract structured job listing fields from scraped page content. \
             Use null for anything the page does not state.",
        )
        .user(format!("Page URL: {url}\n\nPage content:\n{markdown}"))
        .schema_hint(LISTING_SCHEMA_HINT)
        .output()
        .await?;

    if extracted.title.trim().is_empty() {
        return Err(ProcessError::Parse(format!("no title extracted from {url}")));
    }
    if extracted.company_name.trim().is_empty() {
        return Err(ProcessError::Parse(format!(
            "no company name extracted from {url}"
        )));
    }

    Ok(extracted)
}

/// Structured company facts from a company page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedCompany {
    #[serde(default)]
    pub about: Option<String>,
    #[serde(default)]
    pub tech_stack: Vec<String>,
    #[serde(default)]
    pub website: Option<String>,
    /// Candidate job-board / careers URLs seen on the page.
    #[serde(default)]
    pub career_urls: Vec<String>,
}

const COMPANY_SCHEMA_HINT: &str = r#"{
  "about": "... or null",
  "tech_stack": ["..."],
  "website": "... or null",
  "career_urls": ["..."]
}"#;

/// Extract company facts from page markdown.
pub async fn extract_company(
    agents: &AgentManager,
    name: &str,
    markdown: &str,
) -> Result<ExtractedCompany, ProcessError> {
    agents
        .request(EXTRACTION_SCOPE)
        .system(
            "You extract company facts from scraped page content. \
             Use null or empty arrays for anything the page does not state.",
        )
        .user(format!("Company: {name}\n\nPage content:\n{markdown}"))
        .schema_hint(COMPANY_SCHEMA_HINT)
        .output()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracted_listing_accepts_nulls() {
        let json = r#"{"title": "Engineer", "company_name": "Acme", "location": null}"#;
        let extracted: ExtractedListing = serde_json::from_str(json).unwrap();
        assert_eq!(extracted.title, "Engineer");
        assert!(extracted.location.is_none());
        assert!(extracted.posted_date.is_none());
    }

    #[test]
    fn extracted_company_defaults_are_empty() {
        let extracted: ExtractedCompany = serde_json::from_str("{}").unwrap();
        assert!(extracted.tech_stack.is_empty());
        assert!(extracted.career_urls.is_empty());
    }
}
