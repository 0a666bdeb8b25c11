//! Deterministic pre-AI filter.
//!
//! Runs before any agent call so obviously wrong listings never spend
//! budget. Every rejection carries its reasons for audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::canonical_company_name;
use crate::domains::listings::JobListing;
use crate::kernel::config::{PrefilterPolicy, RemotePolicy};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterVerdict {
    pub pass: bool,
    pub reasons: Vec<String>,
}

impl FilterVerdict {
    fn pass() -> Self {
        Self {
            pass: true,
            reasons: Vec::new(),
        }
    }

    fn reject(reasons: Vec<String>) -> Self {
        Self {
            pass: false,
            reasons,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("verdict serializes")
    }
}

/// Evaluate all reject rules; reasons accumulate rather than short-circuit
/// so the audit trail shows everything wrong with a listing.
pub fn evaluate(listing: &JobListing, policy: &PrefilterPolicy, now: DateTime<Utc>) -> FilterVerdict {
    let mut reasons = Vec::new();

    let title_lower = listing.title.to_lowercase();
    for keyword in &policy.excluded_keywords {
        if title_lower.contains(&keyword.to_lowercase()) {
            reasons.push(format!("excluded keyword in title: {keyword}"));
        }
    }

    let canonical = canonical_company_name(&listing.company_name);
    if policy
        .excluded_companies
        .iter()
        .any(|c| canonical_company_name(c) == canonical)
    {
        reasons.push(format!("excluded company: {}", listing.company_name));
    }

    if let Some(domain) = url_domain(&listing.url_normalized) {
        if policy
            .excluded_domains
            .iter()
            .any(|d| domain == d.to_lowercase() || domain.ends_with(&format!(".{}", d.to_lowercase())))
        {
            reasons.push(format!("excluded domain: {domain}"));
        }
    }

    match policy.remote_policy {
        RemotePolicy::Any => {}
        RemotePolicy::RemoteOnly => {
            if !is_remote(listing.location.as_deref()) {
                reasons.push(format!(
                    "not remote: {}",
                    listing.location.as_deref().unwrap_or("no location")
                ));
            }
        }
        RemotePolicy::RemoteOrListed => {
            let location = listing.location.as_deref();
            let listed = location.is_some_and(|loc| {
                let loc_lower = loc.to_lowercase();
                policy
                    .allowed_locations
                    .iter()
                    .any(|allowed| loc_lower.contains(&allowed.to_lowercase()))
            });
            if !is_remote(location) && !listed {
                reasons.push(format!(
                    "location not allowed: {}",
                    location.unwrap_or("no location")
                ));
            }
        }
    }

    if let Some(min_salary) = policy.min_salary {
        // Only reject when the listing states a ceiling below the floor;
        // listings without salary data pass through to analysis.
        if let Some(ceiling) = listing.salary_range.as_deref().and_then(salary_ceiling) {
            if ceiling < min_salary {
                reasons.push(format!("salary ceiling {ceiling} below minimum {min_salary}"));
            }
        }
    }

    if let (Some(max_age), Some(posted)) = (policy.max_age_days, listing.posted_date) {
        let age_days = (now.date_naive() - posted).num_days();
        if age_days > max_age {
            reasons.push(format!("posted {age_days} days ago, window is {max_age}"));
        }
    }

    if reasons.is_empty() {
        FilterVerdict::pass()
    } else {
        FilterVerdict::reject(reasons)
    }
}

fn is_remote(location: Option<&str>) -> bool {
    location.is_some_and(|loc| {
        let loc = loc.to_lowercase();
        loc.contains("remote") || loc.contains("anywhere") || loc.contains("work from home")
    })
}

fn url_domain(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.domain().map(|d| d.to_lowercase()))
}

/// Largest number in a salary string, scaled for "k" shorthand.
/// "$150,000 - $180,000" → 180000; "$120k-$160k" → 160000.
fn salary_ceiling(range: &str) -> Option<i64> {
    let lower = range.to_lowercase();
    let mut best: Option<i64> = None;
    let mut current = String::new();
    let mut chars = lower.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            current.push(c);
            continue;
        }
        if c == ',' && chars.peek().is_some_and(|n| n.is_ascii_digit()) {
            continue;
        }
        if !current.is_empty() {
            let mut value: i64 = current.parse().ok()?;
            if c == 'k' {
                value *= 1000;
            }
            best = Some(best.map_or(value, |b: i64| b.max(value)));
            current.clear();
        }
    }
    if !current.is_empty() {
        let value: i64 = current.parse().ok()?;
        best = Some(best.map_or(value, |b| b.max(value)));
    }

    // Ignore tiny numbers ("5 days/week", "401k" is handled by the k-scale
    // but "4-day" is not a salary)
    best.filter(|v| *v >= 1000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::config::PrefilterPolicy;

    fn listing(title: &str, company: &str) -> JobListing {
        JobListing::builder()
            .url_normalized("https://example.com/jobs/1".to_string())
            .title(title.to_string())
            .company_name(company.to_string())
            .build()
    }

    fn policy() -> PrefilterPolicy {
        PrefilterPolicy::default()
    }

    #[test]
    fn plain_listing_passes() {
        let verdict = evaluate(&listing("Senior Backend Engineer", "Acme"), &policy(), Utc::now());
        assert!(verdict.pass);
        assert!(verdict.reasons.is_empty());
    }

    #[test]
    fn excluded_keyword_rejects() {
        let verdict = evaluate(
            &listing("Software Engineering Intern", "Acme"),
            &policy(),
            Utc::now(),
        );
        assert!(!verdict.pass);
        assert!(verdict.reasons[0].contains("intern"));
    }

    #[test]
    fn keyword_match_is_case_insensitive() {
        let verdict = evaluate(&listing("UNPAID Research Role", "Acme"), &policy(), Utc::now());
        assert!(!verdict.pass);
    }

    #[test]
    fn excluded_company_matches_canonically() {
        let mut p = policy();
        p.excluded_companies = vec!["Acme, Inc.".to_string()];
        let verdict = evaluate(&listing("Backend Engineer", "ACME INC"), &p, Utc::now());
        assert!(!verdict.pass);
    }

    #[test]
    fn excluded_domain_rejects_subdomains_too() {
        let mut p = policy();
        p.excluded_domains = vec!["spamboard.example".to_string()];
        let mut l = listing("Backend Engineer", "Acme");
        l.url_normalized = "https://jobs.spamboard.example/listing/1".to_string();
        let verdict = evaluate(&l, &p, Utc::now());
        assert!(!verdict.pass);
    }

    #[test]
    fn remote_only_rejects_onsite() {
        let mut p = policy();
        p.remote_policy = RemotePolicy::RemoteOnly;
        let mut l = listing("Backend Engineer", "Acme");
        l.location = Some("New York, NY (on-site)".to_string());
        assert!(!evaluate(&l, &p, Utc::now()).pass);

        l.location = Some("Remote (US)".to_string());
        assert!(evaluate(&l, &p, Utc::now()).pass);
    }

    #[test]
    fn listed_location_passes_under_remote_or_listed() {
        let mut p = policy();
        p.remote_policy = RemotePolicy::RemoteOrListed;
        p.allowed_locations = vec!["Portland".to_string()];

        let mut l = listing("Backend Engineer", "Acme");
        l.location = Some("Portland, OR".to_string());
        assert!(evaluate(&l, &p, Utc::now()).pass);

        l.location = Some("Austin, TX".to_string());
        assert!(!evaluate(&l, &p, Utc::now()).pass);
    }

    #[test]
    fn low_salary_ceiling_rejects_but_missing_salary_passes() {
        let mut p = policy();
        p.min_salary = Some(140_000);

        let mut l = listing("Backend Engineer", "Acme");
        l.salary_range = Some("$100,000 - $120,000".to_string());
        assert!(!evaluate(&l, &p, Utc::now()).pass);

        l.salary_range = None;
        assert!(evaluate(&l, &p, Utc::now()).pass);
    }

    #[test]
    fn stale_posting_rejects() {
        let mut l = listing("Backend Engineer", "Acme");
        l.posted_date = Some(Utc::now().date_naive() - chrono::Duration::days(90));
        let verdict = evaluate(&l, &policy(), Utc::now());
        assert!(!verdict.pass);
        assert!(verdict.reasons[0].contains("days ago"));
    }

    #[test]
    fn multiple_violations_all_reported() {
        let mut p = policy();
        p.min_salary = Some(140_000);
        let mut l = listing("Engineering Intern", "Acme");
        l.salary_range = Some("$40,000".to_string());
        let verdict = evaluate(&l, &p, Utc::now());
        assert_eq!(verdict.reasons.len(), 2);
    }

    #[test]
    fn salary_ceiling_parses_common_formats() {
        assert_eq!(salary_ceiling("$150,000 - $180,000"), Some(180_000));
        assert_eq!(salary_ceiling("$120k-$160k"), Some(160_000));
        assert_eq!(salary_ceiling("up to 95000 USD"), Some(95_000));
        assert_eq!(salary_ceiling("competitive"), None);
        assert_eq!(salary_ceiling("4-day week"), None);
    }
}
