//! URL normalization and company-name canonicalization.
//!
//! Every natural key in the pipeline flows through these two functions:
//! listing dedup is keyed on the normalized URL, company dedup on the
//! canonical name. Keep them deterministic: a change here invalidates
//! existing dedup keys.

use anyhow::{Context, Result};
use url::Url;

/// Tracking query parameters stripped during normalization.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "gclid",
    "fbclid",
    "ref",
    "src",
];

/// Normalize a URL into its dedup form.
///
/// - adds `https://` when no scheme is present
/// - lowercases scheme and host
/// - drops fragments and tracking query parameters
/// - sorts surviving query parameters for a stable ordering
/// - trims a trailing slash from the path
pub fn normalize_url(raw: &str) -> Result<String> {
    let raw = raw.trim();
    let with_scheme = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    };

    let mut url = Url::parse(&with_scheme).with_context(|| format!("invalid URL: {raw}"))?;
    url.set_fragment(None);

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort();

    if params.is_empty() {
        url.set_query(None);
    } else {
        let query = params
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&query));
    }

    let path = url.path().trim_end_matches('/').to_string();
    url.set_path(if path.is_empty() { "/" } else { &path });

    Ok(url.to_string())
}

/// Legal suffixes stripped from company names during canonicalization.
const LEGAL_SUFFIXES: &[&str] = &[
    "inc", "incorporated", "llc", "llp", "ltd", "limited", "corp", "corporation", "co", "company",
    "gmbh", "plc", "sa", "ag", "bv", "pty",
];

/// Canonicalize a company name into its dedup form.
///
/// Lowercases, strips punctuation, collapses whitespace, and removes trailing
/// legal suffixes ("Acme, Inc." and "acme inc" both become "acme").
pub fn canonical_company_name(name: &str) -> String {
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();

    let mut words: Vec<&str> = cleaned.split_whitespace().collect();
    while let Some(last) = words.last() {
        if words.len() > 1 && LEGAL_SUFFIXES.contains(last) {
            words.pop();
        } else {
            break;
        }
    }

    words.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds_https_scheme() {
        assert_eq!(
            normalize_url("example.com/jobs/1").unwrap(),
            "https://example.com/jobs/1"
        );
    }

    #[test]
    fn strips_fragment_and_trailing_slash() {
        assert_eq!(
            normalize_url("https://example.com/jobs/1/#apply").unwrap(),
            "https://example.com/jobs/1"
        );
    }

    #[test]
    fn strips_tracking_params_and_sorts_the_rest() {
        assert_eq!(
            normalize_url("https://example.com/jobs?utm_source=x&b=2&a=1").unwrap(),
            "https://example.com/jobs?a=1&b=2"
        );
    }

    #[test]
    fn same_listing_different_tracking_normalizes_identically() {
        let a = normalize_url("https://example.com/jobs/abc?utm_campaign=spring").unwrap();
        let b = normalize_url("example.com/jobs/abc/").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_garbage() {
        assert!(normalize_url("http://").is_err());
    }

    #[test]
    fn canonical_name_strips_legal_suffixes() {
        assert_eq!(canonical_company_name("Acme, Inc."), "acme");
        assert_eq!(canonical_company_name("ACME INC"), "acme");
        assert_eq!(canonical_company_name("Acme Corp."), "acme");
    }

    #[test]
    fn canonical_name_collapses_whitespace_and_punctuation() {
        assert_eq!(
            canonical_company_name("  Big   Data - Labs, LLC "),
            "big data labs"
        );
    }

    #[test]
    fn canonical_name_keeps_single_word_suffix_lookalikes() {
        // "Co" alone is the whole name, not a suffix
        assert_eq!(canonical_company_name("Co"), "co");
    }

    #[test]
    fn canonical_name_strips_stacked_suffixes() {
        assert_eq!(canonical_company_name("Acme Holdings Co., Ltd."), "acme holdings");
    }
}
