//! Mock infrastructure implementations for tests.
//!
//! Mirrors the production traits with scriptable behavior so domain logic
//! and the scheduler can be exercised without network or API keys.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::scrape::{BaseScraper, RawListing, ScrapeError, SourcePage, SourceRequest};
use super::traits::{BaseAgent, ChatResponse, ChatUsage, ProviderError};

// ============================================================================
// Mock agent
// ============================================================================

/// What a `MockAgent` does on each call.
pub enum MockBehavior {
    /// Return these responses in order, repeating the last one.
    Respond(Vec<String>),
    /// Fail every call with an auth error.
    AuthError,
    /// Fail every call with a quota error.
    QuotaError,
    /// Fail every call transiently.
    TransientError,
}

impl MockBehavior {
    pub fn succeed(text: &str) -> Self {
        MockBehavior::Respond(vec![text.to_string()])
    }
}

pub struct MockAgent {
    name: String,
    behavior: MockBehavior,
    calls: AtomicUsize,
    /// Token usage attached to successful responses.
    pub usage: ChatUsage,
}

impl MockAgent {
    pub fn new(name: &str, behavior: MockBehavior) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            calls: AtomicUsize::new(0),
            usage: ChatUsage {
                tokens_in: 1000,
                tokens_out: 500,
            },
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BaseAgent for MockAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        _prompt: &str,
        model: Option<&str>,
    ) -> Result<ChatResponse, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            MockBehavior::Respond(responses) => {
                let text = responses
                    .get(call)
                    .or_else(|| responses.last())
                    .cloned()
                    .unwrap_or_default();
                Ok(ChatResponse {
                    text,
                    model: model.unwrap_or("mock-model").to_string(),
                    usage: self.usage,
                })
            }
            MockBehavior::AuthError => Err(ProviderError::Auth("invalid key".into())),
            MockBehavior::QuotaError => Err(ProviderError::Quota("quota exceeded".into())),
            MockBehavior::TransientError => Err(ProviderError::Transient("timeout".into())),
        }
    }
}

// ============================================================================
// Mock scraper
// ============================================================================

type ListingResult = Result<RawListing, ScrapeError>;
type SourceResult = Result<SourcePage, ScrapeError>;

/// Scriptable scraper: map URLs to canned results.
#[derive(Default)]
pub struct MockScraper {
    listings: Mutex<HashMap<String, ListingResult>>,
    sources: Mutex<HashMap<String, SourceResult>>,
    fetches: AtomicUsize,
}

impl MockScraper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stub_listing(&self, url: &str, result: ListingResult) {
        self.listings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(url.to_string(), result);
    }

    pub fn stub_source(&self, url: &str, result: SourceResult) {
        self.sources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(url.to_string(), result);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// A plausible listing for stubbing.
    pub fn sample_listing(url: &str) -> RawListing {
        RawListing {
            url: url.to_string(),
            title: Some("Senior Backend Engineer".to_string()),
            company_name: Some("Acme, Inc.".to_string()),
            location: Some("Remote".to_string()),
            salary_range: Some("$150,000 - $180,000".to_string()),
            markdown: "## Senior Backend Engineer\nBuild distributed systems in Rust.".to_string(),
            posted_date: None,
        }
    }
}

#[async_trait]
impl BaseScraper for MockScraper {
    async fn fetch_source(&self, request: &SourceRequest) -> Result<SourcePage, ScrapeError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        match sources.get(&request.url) {
            Some(result) => result.clone(),
            None => Err(ScrapeError::NotFound),
        }
    }

    async fn fetch_listing(&self, url: &str) -> Result<RawListing, ScrapeError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let listings = self.listings.lock().unwrap_or_else(|e| e.into_inner());
        match listings.get(url) {
            Some(result) => result.clone(),
            None => Err(ScrapeError::NotFound),
        }
    }
}
