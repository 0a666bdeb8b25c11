//! Experience-weighted match scoring.
//!
//! The model names the skills; this module owns the arithmetic. Keeping the
//! formula out of the prompt means a policy edit re-scores the next listing
//! without prompt surgery.

use crate::domains::listings::MatchPriority;
use crate::kernel::config::{CandidateProfile, MatchPolicy};

/// Skill lists after analog resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillSplit {
    pub matched: Vec<String>,
    pub missing: Vec<String>,
    /// Required skills neutralized by a known analog on the profile:
    /// neither matched nor missing.
    pub neutral: Vec<String>,
}

/// Split required skills against the profile, honoring the analog table.
pub fn split_skills(
    required: &[String],
    profile: &CandidateProfile,
    policy: &MatchPolicy,
) -> SkillSplit {
    let have: Vec<String> = profile.skills.iter().map(|s| s.to_lowercase()).collect();

    let mut matched = Vec::new();
    let mut missing = Vec::new();
    let mut neutral = Vec::new();

    for skill in required {
        let wanted = skill.to_lowercase();
        if have.iter().any(|h| *h == wanted) {
            matched.push(skill.clone());
        } else if has_analog(&wanted, &have, policy) {
            neutral.push(skill.clone());
        } else {
            missing.push(skill.clone());
        }
    }

    SkillSplit {
        matched,
        missing,
        neutral,
    }
}

/// Whether any profile skill is an analog of `wanted` (in either direction).
fn has_analog(wanted: &str, have: &[String], policy: &MatchPolicy) -> bool {
    for (canonical, analogs) in &policy.skill_analogs {
        let canonical = canonical.to_lowercase();
        let analogs: Vec<String> = analogs.iter().map(|a| a.to_lowercase()).collect();

        let group_has_wanted = canonical == wanted || analogs.iter().any(|a| *a == wanted);
        if !group_has_wanted {
            continue;
        }
        let group_on_profile =
            have.iter().any(|h| *h == canonical || analogs.iter().any(|a| a == h));
        if group_on_profile {
            return true;
        }
    }
    false
}

/// `base skill match + years_multiplier * min(years, cap) - capped missing
/// penalty`, clamped to [0, 100].
///
/// `model_score` anchors the base when the listing named no skills at all
/// (nothing to compute a ratio from).
pub fn score(
    split: &SkillSplit,
    model_score: i32,
    profile: &CandidateProfile,
    policy: &MatchPolicy,
) -> i32 {
    let scored_count = split.matched.len() + split.missing.len();
    let base = if scored_count == 0 {
        model_score.clamp(0, 100) as f64
    } else {
        80.0 * split.matched.len() as f64 / scored_count as f64
    };

    let experience_bonus =
        policy.years_multiplier * profile.years_experience.min(policy.years_cap);

    let missing_penalty =
        (4 * split.missing.len() as i32).min(policy.missing_skill_penalty_cap) as f64;

    (base + experience_bonus - missing_penalty).round().clamp(0.0, 100.0) as i32
}

/// Priority band for a score.
pub fn priority_for(score: i32, policy: &MatchPolicy) -> MatchPriority {
    if score >= policy.high_priority_threshold {
        MatchPriority::High
    } else if score >= policy.medium_priority_threshold {
        MatchPriority::Medium
    } else {
        MatchPriority::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(skills: &[&str], years: f64) -> CandidateProfile {
        CandidateProfile {
            skills: skills.iter().map(|s| s.to_string()).collect(),
            years_experience: years,
            ..Default::default()
        }
    }

    fn policy() -> MatchPolicy {
        MatchPolicy::default()
    }

    fn required(skills: &[&str]) -> Vec<String> {
        skills.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn direct_matches_are_case_insensitive() {
        let split = split_skills(
            &required(&["Rust", "PostgreSQL"]),
            &profile(&["rust", "postgresql"], 5.0),
            &policy(),
        );
        assert_eq!(split.matched.len(), 2);
        assert!(split.missing.is_empty());
    }

    #[test]
    fn analog_skills_are_neutral_not_missing() {
        let mut p = policy();
        p.skill_analogs
            .insert("postgresql".to_string(), vec!["mysql".to_string()]);

        let split = split_skills(
            &required(&["MySQL"]),
            &profile(&["postgresql"], 5.0),
            &p,
        );
        assert!(split.matched.is_empty());
        assert!(split.missing.is_empty());
        assert_eq!(split.neutral, vec!["MySQL".to_string()]);
    }

    #[test]
    fn analog_lookup_works_both_directions() {
        let mut p = policy();
        p.skill_analogs
            .insert("postgresql".to_string(), vec!["mysql".to_string()]);

        // Required names the canonical, profile has the analog
        let split = split_skills(&required(&["PostgreSQL"]), &profile(&["mysql"], 5.0), &p);
        assert_eq!(split.neutral.len(), 1);
    }

    #[test]
    fn unknown_skills_are_missing() {
        let split = split_skills(&required(&["COBOL"]), &profile(&["rust"], 5.0), &policy());
        assert_eq!(split.missing, vec!["COBOL".to_string()]);
    }

    #[test]
    fn experience_bonus_is_capped() {
        let p = policy();
        let split = split_skills(
            &required(&["rust"]),
            &profile(&["rust"], 30.0),
            &p,
        );
        // base 80 + 1.5 * min(30, 10) = 95
        assert_eq!(score(&split, 0, &profile(&["rust"], 30.0), &p), 95);
        // 10 years hits the same cap
        assert_eq!(score(&split, 0, &profile(&["rust"], 10.0), &p), 95);
    }

    #[test]
    fn missing_penalty_is_capped() {
        let p = policy();
        let many_missing: Vec<String> = (0..20).map(|i| format!("skill{i}")).collect();
        let split = split_skills(&many_missing, &profile(&[], 0.0), &p);
        // base 0, penalty capped at 25 → clamped to 0
        assert_eq!(score(&split, 0, &profile(&[], 0.0), &p), 0);

        // With strong base the cap limits the damage: 10 matched, 20 missing
        let mut matched_skills: Vec<&str> = vec![];
        let owned: Vec<String> = (0..10).map(|i| format!("have{i}")).collect();
        matched_skills.extend(owned.iter().map(String::as_str));
        let mut req: Vec<String> = owned.clone();
        req.extend(many_missing.clone());
        let prof = profile(&matched_skills, 0.0);
        let split = split_skills(&req, &prof, &p);
        // base 80*(10/30) = 26.67; penalty min(80, 25) = 25 → ~2
        assert_eq!(score(&split, 0, &prof, &p), 2);
    }

    #[test]
    fn no_required_skills_falls_back_to_model_score() {
        let p = policy();
        let prof = profile(&[], 0.0);
        let split = split_skills(&[], &prof, &p);
        assert_eq!(score(&split, 85, &prof, &p), 85);
        assert_eq!(score(&split, 150, &prof, &p), 100, "model score is clamped");
    }

    #[test]
    fn score_never_leaves_bounds() {
        let p = policy();
        let prof = profile(&["rust"], 100.0);
        let split = split_skills(&required(&["rust"]), &prof, &p);
        assert!(score(&split, 100, &prof, &p) <= 100);

        let prof = profile(&[], 0.0);
        let split = split_skills(&required(&["a", "b", "c"]), &prof, &p);
        assert!(score(&split, 0, &prof, &p) >= 0);
    }

    #[test]
    fn priority_bands() {
        let p = policy();
        assert_eq!(priority_for(85, &p), MatchPriority::High);
        assert_eq!(priority_for(80, &p), MatchPriority::High);
        assert_eq!(priority_for(79, &p), MatchPriority::Medium);
        assert_eq!(priority_for(60, &p), MatchPriority::Medium);
        assert_eq!(priority_for(59, &p), MatchPriority::Low);
    }
}
