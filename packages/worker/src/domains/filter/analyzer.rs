//! AI-assisted match analysis.
//!
//! Prompts the configured agent with the listing plus a reduced candidate
//! profile, validates the structured response, applies analog-skill
//! neutrality and the experience-weighted score, and hands back a verdict
//! ready to persist. Shape problems surface as `Transient` so the caller's
//! retry policy applies; the terminal "analyzed with score 0" fallback is
//! the processor's call, not ours.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::scoring;
use crate::domains::listings::{JobListing, MatchPriority};
use crate::kernel::agent::{AgentManager, LlmRequestExt};
use crate::kernel::config::{CandidateProfile, MatchPolicy};
use crate::kernel::error::ProcessError;

/// Scope names used for budget and disable decisions.
pub const ANALYSIS_SCOPE: &str = "worker/analysis";

/// Raw response shape expected from the model.
#[derive(Debug, Deserialize)]
struct RawAnalysis {
    match_score: i32,
    #[serde(default)]
    matched_skills: Vec<String>,
    #[serde(default)]
    missing_skills: Vec<String>,
    #[serde(default)]
    match_reasons: Vec<String>,
    #[serde(default)]
    key_strengths: Vec<String>,
    #[serde(default)]
    potential_concerns: Vec<String>,
    #[serde(default)]
    experience_match: Option<i32>,
    #[serde(default)]
    customization_recommendations: Vec<String>,
    #[serde(default)]
    resume_intake: Option<serde_json::Value>,
}

/// Validated, scored analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchAnalysis {
    pub match_score: i32,
    pub matched_skills: Vec<String>,
    pub missing_skills: Vec<String>,
    pub match_reasons: Vec<String>,
    pub key_strengths: Vec<String>,
    pub potential_concerns: Vec<String>,
    pub experience_match: i32,
    pub application_priority: MatchPriority,
    pub customization_recommendations: Vec<String>,
    pub resume_intake: Option<serde_json::Value>,
}

const SCHEMA_HINT: &str = r#"{
  "match_score": 0-100,
  "matched_skills": ["..."],
  "missing_skills": ["..."],
  "match_reasons": ["..."],
  "key_strengths": ["..."],
  "potential_concerns": ["..."],
  "experience_match": 0-100,
  "customization_recommendations": ["..."],
  "resume_intake": { "summary": "...", "highlight_skills": ["..."] }
}"#;

/// Run the analysis for one listing.
pub async fn analyze(
    agents: &AgentManager,
    listing: &JobListing,
    profile: &CandidateProfile,
    policy: &MatchPolicy,
) -> Result<MatchAnalysis, ProcessError> {
    let raw: RawAnalysis = agents
        .request(ANALYSIS_SCOPE)
        .system(
            "You evaluate how well a job listing matches a candidate. \
             Be specific about skills; do not invent requirements the listing does not state.",
        )
        .user(build_prompt(listing, profile))
        .schema_hint(SCHEMA_HINT)
        .output()
        .await?;

    let analysis = validate(raw, profile, policy)
        .map_err(|reason| ProcessError::Transient(format!("analysis shape invalid: {reason}")))?;

    debug!(
        listing = %listing.id,
        score = analysis.match_score,
        priority = ?analysis.application_priority,
        "analysis complete"
    );
    Ok(analysis)
}

fn build_prompt(listing: &JobListing, profile: &CandidateProfile) -> String {
    format!(
        r#"Evaluate this job listing against the candidate profile.

# Listing
Title: {title}
Company: {company}
Location: {location}
Salary: {salary}

{description}

# Candidate
{summary}
Years of experience: {years}
Skills: {skills}
Preferred titles: {titles}

Score the match from 0-100 and list which listing requirements the candidate
meets (matched_skills) and which they lack (missing_skills)."#,
        title = listing.title,
        company = listing.company_name,
        location = listing.location.as_deref().unwrap_or("unspecified"),
        salary = listing.salary_range.as_deref().unwrap_or("unspecified"),
        description = listing.description,
        summary = profile.summary,
        years = profile.years_experience,
        skills = profile.skills.join(", "),
        titles = profile.preferred_titles.join(", "),
    )
}

/// Validate shape, clamp numerics, neutralize analogs, apply the
/// experience-weighted score and derive the priority band.
fn validate(
    raw: RawAnalysis,
    profile: &CandidateProfile,
    policy: &MatchPolicy,
) -> Result<MatchAnalysis, String> {
    // An out-of-range score means the model did not follow the contract;
    // the whole response is suspect.
    if !(0..=100).contains(&raw.match_score) {
        return Err(format!("match_score {} outside [0, 100]", raw.match_score));
    }

    // Re-split the model's skills against the profile so analog-equivalent
    // skills stop counting as missing.
    let mut required = raw.matched_skills.clone();
    required.extend(raw.missing_skills.iter().cloned());
    let split = scoring::split_skills(&required, profile, policy);

    let match_score = scoring::score(&split, raw.match_score, profile, policy);
    let experience_match = raw
        .experience_match
        .map(|v| v.clamp(0, 100))
        .unwrap_or(match_score);

    Ok(MatchAnalysis {
        match_score,
        matched_skills: split.matched,
        missing_skills: split.missing,
        match_reasons: truncate_all(raw.match_reasons),
        key_strengths: truncate_all(raw.key_strengths),
        potential_concerns: truncate_all(raw.potential_concerns),
        experience_match,
        application_priority: scoring::priority_for(match_score, policy),
        customization_recommendations: truncate_all(raw.customization_recommendations),
        resume_intake: raw.resume_intake,
    })
}

/// Keep persisted sequences short: a few items of short text each.
fn truncate_all(mut items: Vec<String>) -> Vec<String> {
    items.truncate(10);
    for item in &mut items {
        crate::common::truncate_lossy(item, 500);
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(score: i32) -> RawAnalysis {
        RawAnalysis {
            match_score: score,
            matched_skills: vec![],
            missing_skills: vec![],
            match_reasons: vec![],
            key_strengths: vec![],
            potential_concerns: vec![],
            experience_match: None,
            customization_recommendations: vec![],
            resume_intake: None,
        }
    }

    fn profile(skills: &[&str], years: f64) -> CandidateProfile {
        CandidateProfile {
            skills: skills.iter().map(|s| s.to_string()).collect(),
            years_experience: years,
            ..Default::default()
        }
    }

    #[test]
    fn out_of_range_score_is_rejected() {
        let policy = MatchPolicy::default();
        assert!(validate(raw(101), &profile(&[], 0.0), &policy).is_err());
        assert!(validate(raw(-1), &profile(&[], 0.0), &policy).is_err());
        assert!(validate(raw(0), &profile(&[], 0.0), &policy).is_ok());
        assert!(validate(raw(100), &profile(&[], 0.0), &policy).is_ok());
    }

    #[test]
    fn model_score_carries_through_when_no_skills_listed() {
        let policy = MatchPolicy::default();
        let analysis = validate(raw(85), &profile(&[], 0.0), &policy).unwrap();
        assert_eq!(analysis.match_score, 85);
        assert_eq!(analysis.application_priority, MatchPriority::High);
        assert_eq!(analysis.experience_match, 85, "defaults to match score");
    }

    #[test]
    fn analog_skills_move_out_of_missing() {
        let mut policy = MatchPolicy::default();
        policy
            .skill_analogs
            .insert("postgresql".to_string(), vec!["mysql".to_string()]);

        let mut r = raw(70);
        r.matched_skills = vec!["Rust".to_string()];
        r.missing_skills = vec!["MySQL".to_string()];

        let analysis = validate(r, &profile(&["rust", "postgresql"], 0.0), &policy).unwrap();
        assert_eq!(analysis.matched_skills, vec!["Rust".to_string()]);
        assert!(analysis.missing_skills.is_empty(), "analog is not missing");
    }

    #[test]
    fn experience_match_is_clamped() {
        let policy = MatchPolicy::default();
        let mut r = raw(50);
        r.experience_match = Some(250);
        let analysis = validate(r, &profile(&[], 0.0), &policy).unwrap();
        assert_eq!(analysis.experience_match, 100);
    }

    #[test]
    fn long_sequences_are_truncated() {
        let policy = MatchPolicy::default();
        let mut r = raw(50);
        r.match_reasons = (0..50).map(|i| format!("reason {i}")).collect();
        r.key_strengths = vec!["x".repeat(2000)];
        let analysis = validate(r, &profile(&[], 0.0), &policy).unwrap();
        assert_eq!(analysis.match_reasons.len(), 10);
        assert_eq!(analysis.key_strengths[0].len(), 500);
    }

    #[test]
    fn prompt_includes_listing_and_profile() {
        let listing = JobListing::builder()
            .url_normalized("https://example.com/jobs/1".to_string())
            .title("Backend Engineer".to_string())
            .company_name("Acme".to_string())
            .description("Rust services".to_string())
            .build();
        let prompt = build_prompt(&listing, &profile(&["rust"], 7.0));
        assert!(prompt.contains("Backend Engineer"));
        assert!(prompt.contains("Rust services"));
        assert!(prompt.contains("rust"));
        assert!(prompt.contains('7'));
    }
}
