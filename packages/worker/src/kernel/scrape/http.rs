//! Generic HTTP scraper - reqwest + HTML parsing, no JavaScript rendering.
//!
//! This implementation:
//! - Uses reqwest for HTTP requests with a browser-like User-Agent
//! - Uses the scraper crate for HTML parsing
//! - Uses htmd for HTML to Markdown conversion
//! - Discovers listing links on source pages by path heuristics
//!
//! Limitations:
//! - No JavaScript rendering (static HTML boards and career pages only)

use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

use super::{BaseScraper, RawListing, ScrapeError, SourcePage, SourceRequest};
use crate::common::normalize_url;

/// Path fragments that mark a link as a probable job posting.
const LISTING_PATH_HINTS: &[&str] = &[
    "/job/", "/jobs/", "/careers/", "/career/", "/position", "/opening", "/vacanc", "/posting",
];

pub struct HttpScraper {
    client: reqwest::Client,
}

impl HttpScraper {
    pub fn new(timeout: Duration) -> Result<Self, ScrapeError> {
        // Browser-like User-Agent avoids the cheapest bot detection
        let user_agent = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"
                .parse()
                .expect("static header value"),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            "en-US,en;q=0.5".parse().expect("static header value"),
        );

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| ScrapeError::Transient(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }

    async fn fetch_html(&self, url: &str) -> Result<(String, String), ScrapeError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ScrapeError::Transient(format!("timeout fetching {url}"))
            } else {
                ScrapeError::Transient(format!("request failed: {e}"))
            }
        })?;

        let final_url = response.url().to_string();
        let status = response.status();
        match status.as_u16() {
            404 => return Err(ScrapeError::NotFound),
            410 => return Err(ScrapeError::Gone),
            403 | 429 => return Err(ScrapeError::Blocked(format!("HTTP {status} for {url}"))),
            s if s >= 500 => {
                return Err(ScrapeError::Transient(format!("HTTP {status} for {url}")))
            }
            s if !status.is_success() => {
                return Err(ScrapeError::Transient(format!("HTTP {s} for {url}")))
            }
            _ => {}
        }

        let body = response
            .text()
            .await
            .map_err(|e| ScrapeError::Transient(format!("failed to read body: {e}")))?;
        Ok((final_url, body))
    }

    /// Extract title from HTML document
    fn extract_title(document: &Html) -> Option<String> {
        let title_selector = Selector::parse("title").ok()?;
        document
            .select(&title_selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
    }

    /// Extract main content HTML, stripping nav/header/footer/aside
    fn extract_main_content(document: &Html) -> String {
        let main_selectors = [
            "main",
            "article",
            "[role='main']",
            "#content",
            "#main",
            ".content",
            ".job-description",
            ".posting",
        ];

        for selector_str in main_selectors {
            if let Ok(selector) = Selector::parse(selector_str) {
                if let Some(main) = document.select(&selector).next() {
                    return main.html();
                }
            }
        }

        // Fallback: whole body
        if let Ok(body_selector) = Selector::parse("body") {
            if let Some(body) = document.select(&body_selector).next() {
                return body.html();
            }
        }

        document.html()
    }

    /// Convert HTML to Markdown
    fn html_to_markdown(html: &str) -> String {
        htmd::convert(html).unwrap_or_else(|_| {
            // Fallback: strip tags and return plain text
            let document = Html::parse_document(html);
            document.root_element().text().collect::<String>()
        })
    }

    /// Collect probable listing links from a source page.
    fn extract_listing_links(document: &Html, base_url: &Url) -> Vec<(String, Option<String>)> {
        let link_selector = match Selector::parse("a[href]") {
            Ok(s) => s,
            Err(_) => return vec![],
        };

        let mut seen = std::collections::HashSet::new();
        let mut links = Vec::new();

        for el in document.select(&link_selector) {
            let Some(href) = el.value().attr("href") else {
                continue;
            };
            let Ok(resolved) = base_url.join(href) else {
                continue;
            };
            if resolved.scheme() != "http" && resolved.scheme() != "https" {
                continue;
            }

            let path = resolved.path().to_lowercase();
            if !LISTING_PATH_HINTS.iter().any(|hint| path.contains(hint)) {
                continue;
            }

            let Ok(normalized) = normalize_url(resolved.as_str()) else {
                continue;
            };
            if normalized == normalize_url(base_url.as_str()).unwrap_or_default() {
                continue;
            }
            if !seen.insert(normalized.clone()) {
                continue;
            }

            let anchor_text = el.text().collect::<String>().trim().to_string();
            let title = if anchor_text.is_empty() {
                None
            } else {
                Some(anchor_text)
            };
            links.push((normalized, title));
        }

        links
    }
}

#[async_trait]
impl BaseScraper for HttpScraper {
    async fn fetch_source(&self, request: &SourceRequest) -> Result<SourcePage, ScrapeError> {
        let url = normalize_url(&request.url)
            .map_err(|e| ScrapeError::Parse(format!("bad source URL: {e}")))?;
        debug!(url = %url, source_type = %request.source_type, "fetching source page");

        let (final_url, html) = self.fetch_html(&url).await?;
        let base_url = Url::parse(&final_url)
            .map_err(|e| ScrapeError::Parse(format!("bad final URL {final_url}: {e}")))?;

        let links = {
            let document = Html::parse_document(&html);
            Self::extract_listing_links(&document, &base_url)
        };
        if links.is_empty() {
            debug!(url = %url, "source page yielded no listing links");
        }

        let listings = links
            .into_iter()
            .map(|(link, title)| RawListing {
                url: link,
                title,
                company_name: None,
                location: None,
                salary_range: None,
                markdown: String::new(),
                posted_date: None,
            })
            .collect();

        // Static pages carry everything at once; paginated boards are the
        // territory of the specialized adapters.
        Ok(SourcePage {
            listings,
            next_cursor: None,
        })
    }

    async fn fetch_listing(&self, url: &str) -> Result<RawListing, ScrapeError> {
        let url =
            normalize_url(url).map_err(|e| ScrapeError::Parse(format!("bad listing URL: {e}")))?;
        debug!(url = %url, "fetching listing");

        let (final_url, html) = self.fetch_html(&url).await?;

        let (title, markdown) = {
            let document = Html::parse_document(&html);
            let title = Self::extract_title(&document);
            let main_content = Self::extract_main_content(&document);
            (title, Self::html_to_markdown(&main_content))
        };

        if markdown.trim().len() < 100 {
            warn!(url = %url, "listing page has minimal content");
        }

        let normalized_final = normalize_url(&final_url).unwrap_or(url);
        Ok(RawListing {
            url: normalized_final,
            title,
            company_name: None,
            location: None,
            salary_range: None,
            markdown,
            posted_date: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(html: &str) -> Html {
        Html::parse_document(html)
    }

    #[test]
    fn extracts_title() {
        let html = r#"<html><head><title>Backend Engineer - Acme</title></head><body></body></html>"#;
        assert_eq!(
            HttpScraper::extract_title(&doc(html)),
            Some("Backend Engineer - Acme".to_string())
        );
    }

    #[test]
    fn missing_title_is_none() {
        assert_eq!(HttpScraper::extract_title(&doc("<html><body></body></html>")), None);
    }

    #[test]
    fn prefers_main_content_over_body() {
        let html = r#"<html><body><nav>menu</nav><main><p>the role</p></main></body></html>"#;
        let content = HttpScraper::extract_main_content(&doc(html));
        assert!(content.contains("the role"));
        assert!(!content.contains("menu"));
    }

    #[test]
    fn converts_html_to_markdown() {
        let md = HttpScraper::html_to_markdown("<h1>Role</h1><p>Build things</p>");
        assert!(md.contains("Role"));
        assert!(md.contains("Build things"));
    }

    #[test]
    fn listing_links_need_a_job_path_hint() {
        let html = r#"
            <html><body>
              <a href="/jobs/123">Backend Engineer</a>
              <a href="/about">About us</a>
              <a href="https://other.example/careers/42">Platform Engineer</a>
              <a href="mailto:hr@example.com">Email</a>
            </body></html>
        "#;
        let base = Url::parse("https://example.com/jobs").unwrap();
        let links = HttpScraper::extract_listing_links(&doc(html), &base);

        let urls: Vec<&str> = links.iter().map(|(u, _)| u.as_str()).collect();
        assert!(urls.contains(&"https://example.com/jobs/123"));
        assert!(urls.contains(&"https://other.example/careers/42"));
        assert!(!urls.iter().any(|u| u.contains("/about")));
        assert_eq!(links.len(), 2);
    }

    #[test]
    fn listing_links_keep_anchor_text_as_title() {
        let html = r#"<html><body><a href="/jobs/123">Backend Engineer</a></body></html>"#;
        let base = Url::parse("https://example.com/").unwrap();
        let links = HttpScraper::extract_listing_links(&doc(html), &base);
        assert_eq!(links[0].1.as_deref(), Some("Backend Engineer"));
    }

    #[test]
    fn duplicate_links_collapse() {
        let html = r#"
            <html><body>
              <a href="/jobs/123">Backend Engineer</a>
              <a href="/jobs/123?utm_source=feed">Backend Engineer</a>
            </body></html>
        "#;
        let base = Url::parse("https://example.com/").unwrap();
        let links = HttpScraper::extract_listing_links(&doc(html), &base);
        assert_eq!(links.len(), 1);
    }
}
