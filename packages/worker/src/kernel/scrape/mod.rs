//! Scraper adapter: how the pipeline reaches the web.
//!
//! The core sees two capabilities behind the `BaseScraper` trait: fetch a
//! source page (zero or more raw listings, possibly paginated) and fetch a
//! single listing. Vendor-specific board parsers live outside the core;
//! the bundled implementation is a generic HTTP fetcher.

pub mod http;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::kernel::error::ProcessError;

pub use http::HttpScraper;

/// Scraper failures, classified the way the queue needs them.
#[derive(Debug, Clone, Error)]
pub enum ScrapeError {
    /// 404. The listing is simply not there; terminal skip.
    #[error("not found")]
    NotFound,
    /// 410. The listing existed and was taken down; terminal skip.
    #[error("gone")]
    Gone,
    /// Bot wall, 403 interstitial, 429. Retry with the long backoff floor.
    #[error("blocked: {0}")]
    Blocked(String),
    /// Timeouts, connection failures, 5xx.
    #[error("transient: {0}")]
    Transient(String),
    /// The page came back but mandatory structure was missing.
    #[error("parse: {0}")]
    Parse(String),
}

impl From<ScrapeError> for ProcessError {
    fn from(err: ScrapeError) -> Self {
        match err {
            ScrapeError::NotFound => ProcessError::NotFound,
            ScrapeError::Gone => ProcessError::Gone,
            ScrapeError::Blocked(msg) => ProcessError::Blocked(msg),
            ScrapeError::Transient(msg) => ProcessError::Transient(msg),
            ScrapeError::Parse(msg) => ProcessError::Parse(msg),
        }
    }
}

/// A listing as scraped, before extraction fills in structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawListing {
    pub url: String,
    pub title: Option<String>,
    pub company_name: Option<String>,
    pub location: Option<String>,
    pub salary_range: Option<String>,
    /// Page content converted to Markdown; the extraction step works on this.
    pub markdown: String,
    pub posted_date: Option<NaiveDate>,
}

/// One page of a source fetch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcePage {
    pub listings: Vec<RawListing>,
    /// Present when the source paginates and more pages remain.
    pub next_cursor: Option<String>,
}

/// What to fetch from a source.
#[derive(Debug, Clone)]
pub struct SourceRequest {
    pub url: String,
    /// Source type tag ("rss", "html", "company_page", ...). The generic
    /// fetcher treats them alike; specialized adapters dispatch on it.
    pub source_type: String,
    pub cursor: Option<String>,
}

#[async_trait]
pub trait BaseScraper: Send + Sync {
    /// Fetch one page of listings from a source.
    async fn fetch_source(&self, request: &SourceRequest) -> Result<SourcePage, ScrapeError>;

    /// Fetch and normalize a single listing page.
    async fn fetch_listing(&self, url: &str) -> Result<RawListing, ScrapeError>;
}
