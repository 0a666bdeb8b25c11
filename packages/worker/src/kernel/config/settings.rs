//! Typed configuration values.
//!
//! Each recognized config key deserializes into one of these structs. Every
//! field carries a serde default so a partial document in the database (or a
//! missing one) still yields a usable value.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Marker tying a settings struct to its database key.
pub trait ConfigKey {
    const KEY: &'static str;
}

// ============================================================================
// scheduler-settings
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Master switch; cron ticks are no-ops when false.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Scrape ticks run only inside [start, end) local hours.
    #[serde(default = "default_daytime_start")]
    pub daytime_start_hour: u32,
    #[serde(default = "default_daytime_end")]
    pub daytime_end_hour: u32,
    /// IANA timezone name for the daytime window and budget rollover.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Stop enqueuing scrapes once this many matches landed today.
    #[serde(default = "default_target_matches")]
    pub target_matches: i64,
    /// Sources per scrape tick.
    #[serde(default = "default_max_sources")]
    pub max_sources: i64,
    #[serde(default = "default_min_match_score")]
    pub min_match_score: i32,
    /// Per-source cooldown between scrapes.
    #[serde(default = "default_scrape_cooldown")]
    pub scrape_cooldown_minutes: i64,
}

impl ConfigKey for SchedulerSettings {
    const KEY: &'static str = "scheduler-settings";
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).expect("all fields have defaults")
    }
}

impl SchedulerSettings {
    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone.parse().unwrap_or(chrono_tz::UTC)
    }

    /// Whether `now` falls inside the configured daytime window.
    pub fn within_daytime(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        use chrono::Timelike;
        let hour = now.with_timezone(&self.tz()).hour();
        if self.daytime_start_hour <= self.daytime_end_hour {
            hour >= self.daytime_start_hour && hour < self.daytime_end_hour
        } else {
            // Window wraps midnight
            hour >= self.daytime_start_hour || hour < self.daytime_end_hour
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_daytime_start() -> u32 {
    7
}
fn default_daytime_end() -> u32 {
    22
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_target_matches() -> i64 {
    25
}
fn default_max_sources() -> i64 {
    10
}
fn default_min_match_score() -> i32 {
    60
}
fn default_scrape_cooldown() -> i64 {
    360
}

// ============================================================================
// ai-settings
// ============================================================================

/// Cost per 1K tokens for one model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct ModelRate {
    #[serde(default)]
    pub input_per_1k: f64,
    #[serde(default)]
    pub output_per_1k: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiSettings {
    /// Providers tried in order until one succeeds.
    #[serde(default = "default_fallback_chain")]
    pub fallback_chain: Vec<String>,
    /// Scope → enabled. Missing scopes default to enabled.
    #[serde(default)]
    pub per_scope_enabled: HashMap<String, bool>,
    /// Model → token rates, for ledger accounting.
    #[serde(default)]
    pub model_rates: HashMap<String, ModelRate>,
    /// Provider → default model.
    #[serde(default)]
    pub provider_models: HashMap<String, String>,
}

impl ConfigKey for AiSettings {
    const KEY: &'static str = "ai-settings";
}

impl Default for AiSettings {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).expect("all fields have defaults")
    }
}

impl AiSettings {
    pub fn scope_enabled(&self, scope: &str) -> bool {
        self.per_scope_enabled.get(scope).copied().unwrap_or(true)
    }

    pub fn rate_for(&self, model: &str) -> ModelRate {
        self.model_rates.get(model).copied().unwrap_or_default()
    }
}

fn default_fallback_chain() -> Vec<String> {
    vec!["openai".to_string()]
}

// ============================================================================
// match-policy
// ============================================================================

/// When to fan out company enrichment after a saved match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnrichOnSave {
    Never,
    #[default]
    HighPriority,
    Always,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchPolicy {
    /// Scores at or above this band are High priority.
    #[serde(default = "default_high_band")]
    pub high_priority_threshold: i32,
    /// Scores at or above this band (and below high) are Medium.
    #[serde(default = "default_medium_band")]
    pub medium_priority_threshold: i32,
    /// Minimum score worth persisting a match for.
    #[serde(default = "default_save_threshold")]
    pub min_score_to_save: i32,
    /// Experience weighting: `years_multiplier * min(years, years_cap)`
    /// added on top of the base skill score.
    #[serde(default = "default_years_multiplier")]
    pub years_multiplier: f64,
    #[serde(default = "default_years_cap")]
    pub years_cap: f64,
    /// Skills treated as equivalent (canonical → analogs). A required skill
    /// with a known analog on the profile is neither matched nor missing.
    #[serde(default)]
    pub skill_analogs: HashMap<String, Vec<String>>,
    /// Penalty cap for missing skills, in score points.
    #[serde(default = "default_missing_penalty_cap")]
    pub missing_skill_penalty_cap: i32,
    #[serde(default)]
    pub enrich_on_save: EnrichOnSave,
}

impl ConfigKey for MatchPolicy {
    const KEY: &'static str = "match-policy";
}

impl Default for MatchPolicy {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).expect("all fields have defaults")
    }
}

fn default_high_band() -> i32 {
    80
}
fn default_medium_band() -> i32 {
    60
}
fn default_save_threshold() -> i32 {
    60
}
fn default_years_multiplier() -> f64 {
    1.5
}
fn default_years_cap() -> f64 {
    10.0
}
fn default_missing_penalty_cap() -> i32 {
    25
}

// ============================================================================
// prefilter-policy
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RemotePolicy {
    /// Any location passes.
    #[default]
    Any,
    /// Only remote-friendly listings pass.
    RemoteOnly,
    /// Remote or one of `allowed_locations`.
    RemoteOrListed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefilterPolicy {
    /// Title keywords that reject outright (case-insensitive).
    #[serde(default = "default_excluded_keywords")]
    pub excluded_keywords: Vec<String>,
    /// Canonical company names never worth analyzing.
    #[serde(default)]
    pub excluded_companies: Vec<String>,
    /// Listing-URL domains never worth analyzing.
    #[serde(default)]
    pub excluded_domains: Vec<String>,
    #[serde(default)]
    pub remote_policy: RemotePolicy,
    /// Substrings accepted as locations under `RemoteOrListed`.
    #[serde(default)]
    pub allowed_locations: Vec<String>,
    /// Listings whose stated ceiling is below this are rejected.
    #[serde(default)]
    pub min_salary: Option<i64>,
    /// Listings older than this are rejected.
    #[serde(default = "default_max_age_days")]
    pub max_age_days: Option<i64>,
}

impl ConfigKey for PrefilterPolicy {
    const KEY: &'static str = "prefilter-policy";
}

impl Default for PrefilterPolicy {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).expect("all fields have defaults")
    }
}

fn default_excluded_keywords() -> Vec<String> {
    ["intern", "internship", "unpaid", "volunteer"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_max_age_days() -> Option<i64> {
    Some(45)
}

// ============================================================================
// worker-settings
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Pause between dispatches on a busy worker.
    #[serde(default = "default_task_delay")]
    pub task_delay_seconds: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Item type → cap on simultaneous dispatches.
    #[serde(default)]
    pub per_type_concurrency: HashMap<String, usize>,
    #[serde(default = "default_retry_base")]
    pub retry_base_seconds: i64,
    #[serde(default = "default_retry_max")]
    pub retry_max_seconds: i64,
    #[serde(default = "default_blocked_floor")]
    pub blocked_floor_seconds: i64,
    #[serde(default = "default_max_depth")]
    pub max_depth: i32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    /// Claim lease; expired claims are swept back to pending. When unset,
    /// 5 × poll interval.
    #[serde(default)]
    pub lease_ttl_seconds: Option<u64>,
    /// Hard deadline for one scraper call.
    #[serde(default = "default_scrape_timeout")]
    pub scrape_timeout_seconds: u64,
    /// Hard deadline for one agent call.
    #[serde(default = "default_agent_timeout")]
    pub agent_timeout_seconds: u64,
    /// Total time budget for dispatching one item.
    #[serde(default = "default_item_timeout")]
    pub item_timeout_seconds: u64,
}

impl ConfigKey for WorkerSettings {
    const KEY: &'static str = "worker-settings";
}

impl Default for WorkerSettings {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).expect("all fields have defaults")
    }
}

impl WorkerSettings {
    pub fn lease_ttl(&self) -> chrono::Duration {
        let seconds = self
            .lease_ttl_seconds
            .unwrap_or(self.poll_interval_seconds * 5)
            .max(self.poll_interval_seconds * 5);
        chrono::Duration::seconds(seconds as i64)
    }

    pub fn type_cap(&self, item_type: &str) -> usize {
        self.per_type_concurrency
            .get(item_type)
            .copied()
            .unwrap_or(self.max_concurrency)
            .max(1)
    }
}

fn default_poll_interval() -> u64 {
    15
}
fn default_task_delay() -> u64 {
    1
}
fn default_max_concurrency() -> usize {
    4
}
fn default_retry_base() -> i64 {
    30
}
fn default_retry_max() -> i64 {
    3600
}
fn default_blocked_floor() -> i64 {
    600
}
fn default_max_depth() -> i32 {
    8
}
fn default_max_attempts() -> i32 {
    3
}
fn default_scrape_timeout() -> u64 {
    60
}
fn default_agent_timeout() -> u64 {
    120
}
fn default_item_timeout() -> u64 {
    300
}

// ============================================================================
// cost-budget
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostBudget {
    /// Provider → daily ceiling in USD.
    #[serde(default)]
    pub per_provider_usd: HashMap<String, f64>,
    /// Applied to providers without an explicit entry.
    #[serde(default = "default_daily_budget")]
    pub default_daily_usd: f64,
}

impl ConfigKey for CostBudget {
    const KEY: &'static str = "cost-budget";
}

impl Default for CostBudget {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).expect("all fields have defaults")
    }
}

impl CostBudget {
    pub fn limit_for(&self, provider: &str) -> f64 {
        self.per_provider_usd
            .get(provider)
            .copied()
            .unwrap_or(self.default_daily_usd)
    }
}

fn default_daily_budget() -> f64 {
    5.0
}

// ============================================================================
// candidate-profile
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CandidateProfile {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub years_experience: f64,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub preferred_titles: Vec<String>,
    #[serde(default)]
    pub preferred_locations: Vec<String>,
    #[serde(default)]
    pub min_salary: Option<i64>,
}

impl ConfigKey for CandidateProfile {
    const KEY: &'static str = "candidate-profile";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_documents_deserialize_to_defaults() {
        let scheduler: SchedulerSettings = serde_json::from_str("{}").unwrap();
        assert!(scheduler.enabled);
        assert_eq!(scheduler.timezone, "UTC");

        let worker: WorkerSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(worker.poll_interval_seconds, 15);
        assert_eq!(worker.max_concurrency, 4);

        let budget: CostBudget = serde_json::from_str("{}").unwrap();
        assert_eq!(budget.limit_for("anything"), 5.0);
    }

    #[test]
    fn partial_documents_keep_other_defaults() {
        let policy: MatchPolicy =
            serde_json::from_str(r#"{"high_priority_threshold": 90}"#).unwrap();
        assert_eq!(policy.high_priority_threshold, 90);
        assert_eq!(policy.medium_priority_threshold, 60);
        assert_eq!(policy.enrich_on_save, EnrichOnSave::HighPriority);
    }

    #[test]
    fn daytime_window_respects_timezone() {
        let settings: SchedulerSettings = serde_json::from_value(serde_json::json!({
            "daytime_start_hour": 8,
            "daytime_end_hour": 20,
            "timezone": "America/Los_Angeles",
        }))
        .unwrap();

        // 16:00 UTC = 08:00/09:00 Pacific depending on DST; always inside
        let inside = "2025-06-15T18:00:00Z".parse().unwrap();
        assert!(settings.within_daytime(inside));

        // 12:00 UTC = 04:00/05:00 Pacific; outside
        let outside = "2025-06-15T12:00:00Z".parse().unwrap();
        assert!(!settings.within_daytime(outside));
    }

    #[test]
    fn daytime_window_can_wrap_midnight() {
        let settings: SchedulerSettings = serde_json::from_value(serde_json::json!({
            "daytime_start_hour": 22,
            "daytime_end_hour": 6,
            "timezone": "UTC",
        }))
        .unwrap();
        assert!(settings.within_daytime("2025-06-15T23:00:00Z".parse().unwrap()));
        assert!(settings.within_daytime("2025-06-15T03:00:00Z".parse().unwrap()));
        assert!(!settings.within_daytime("2025-06-15T12:00:00Z".parse().unwrap()));
    }

    #[test]
    fn lease_ttl_floors_at_five_polls() {
        let mut settings = WorkerSettings::default();
        settings.poll_interval_seconds = 10;
        settings.lease_ttl_seconds = Some(3);
        assert_eq!(settings.lease_ttl(), chrono::Duration::seconds(50));

        settings.lease_ttl_seconds = Some(600);
        assert_eq!(settings.lease_ttl(), chrono::Duration::seconds(600));
    }

    #[test]
    fn scope_defaults_to_enabled() {
        let mut ai = AiSettings::default();
        assert!(ai.scope_enabled("worker/analysis"));
        ai.per_scope_enabled.insert("worker/analysis".into(), false);
        assert!(!ai.scope_enabled("worker/analysis"));
    }

    #[test]
    fn unknown_timezone_falls_back_to_utc() {
        let settings: SchedulerSettings =
            serde_json::from_value(serde_json::json!({"timezone": "Not/AZone"})).unwrap();
        assert_eq!(settings.tz(), chrono_tz::UTC);
    }
}
