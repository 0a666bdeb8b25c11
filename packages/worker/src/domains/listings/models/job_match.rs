//! Job match model: the analysis verdict for one listing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use typed_builder::TypedBuilder;

use crate::common::{ListingId, MatchId, QueueItemId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "match_priority", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MatchPriority {
    High,
    Medium,
    #[default]
    Low,
}

/// Exactly one row per listing; re-analysis overwrites in place.
#[derive(sqlx::FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct JobMatch {
    #[builder(default = MatchId::new())]
    pub id: MatchId,
    pub job_listing_id: ListingId,

    pub match_score: i32,
    #[builder(default)]
    pub matched_skills: Vec<String>,
    #[builder(default)]
    pub missing_skills: Vec<String>,
    #[builder(default)]
    pub match_reasons: Vec<String>,
    #[builder(default)]
    pub key_strengths: Vec<String>,
    #[builder(default)]
    pub potential_concerns: Vec<String>,
    #[builder(default)]
    pub experience_match: i32,
    #[builder(default)]
    pub application_priority: MatchPriority,
    #[builder(default)]
    pub customization_recommendations: Vec<String>,
    /// Structured draft the document builder consumes downstream.
    #[builder(default, setter(strip_option))]
    pub resume_intake: Option<serde_json::Value>,

    #[builder(default = Utc::now())]
    pub analyzed_at: DateTime<Utc>,
    /// Queue item that produced this row, for audit.
    #[builder(default, setter(strip_option))]
    pub queue_item_id: Option<QueueItemId>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

const COLUMNS: &str = "id, job_listing_id, match_score, matched_skills, missing_skills, \
                       match_reasons, key_strengths, potential_concerns, experience_match, \
                       application_priority, customization_recommendations, resume_intake, \
                       analyzed_at, queue_item_id, created_at, updated_at";

impl JobMatch {
    /// One match per listing: insert or overwrite.
    pub async fn upsert_for_listing(&self, pool: &PgPool) -> Result<Self, sqlx::Error> {
        let sql = format!(
            r#"
            INSERT INTO job_matches (
                id, job_listing_id, match_score, matched_skills, missing_skills, match_reasons,
                key_strengths, potential_concerns, experience_match, application_priority,
                customization_recommendations, resume_intake, analyzed_at, queue_item_id,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (job_listing_id) DO UPDATE SET
                match_score = EXCLUDED.match_score,
                matched_skills = EXCLUDED.matched_skills,
                missing_skills = EXCLUDED.missing_skills,
                match_reasons = EXCLUDED.match_reasons,
                key_strengths = EXCLUDED.key_strengths,
                potential_concerns = EXCLUDED.potential_concerns,
                experience_match = EXCLUDED.experience_match,
                application_priority = EXCLUDED.application_priority,
                customization_recommendations = EXCLUDED.customization_recommendations,
                resume_intake = EXCLUDED.resume_intake,
                analyzed_at = EXCLUDED.analyzed_at,
                queue_item_id = EXCLUDED.queue_item_id,
                updated_at = NOW()
            RETURNING {COLUMNS}
            "#
        );
        sqlx::query_as::<_, Self>(&sql)
            .bind(self.id)
            .bind(self.job_listing_id)
            .bind(self.match_score)
            .bind(&self.matched_skills)
            .bind(&self.missing_skills)
            .bind(&self.match_reasons)
            .bind(&self.key_strengths)
            .bind(&self.potential_concerns)
            .bind(self.experience_match)
            .bind(self.application_priority)
            .bind(&self.customization_recommendations)
            .bind(&self.resume_intake)
            .bind(self.analyzed_at)
            .bind(self.queue_item_id)
            .bind(self.created_at)
            .bind(self.updated_at)
            .fetch_one(pool)
            .await
    }

    pub async fn find_for_listing(
        job_listing_id: ListingId,
        pool: &PgPool,
    ) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!("SELECT {COLUMNS} FROM job_matches WHERE job_listing_id = $1");
        sqlx::query_as::<_, Self>(&sql)
            .bind(job_listing_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(
        min_score: Option<i32>,
        priority: Option<MatchPriority>,
        limit: i64,
        pool: &PgPool,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {COLUMNS} FROM job_matches
            WHERE ($1::int IS NULL OR match_score >= $1)
              AND ($2::match_priority IS NULL OR application_priority = $2)
            ORDER BY match_score DESC, analyzed_at DESC
            LIMIT $3
            "#
        );
        sqlx::query_as::<_, Self>(&sql)
            .bind(min_score)
            .bind(priority)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    pub async fn count_since(
        since: DateTime<Utc>,
        min_score: i32,
        pool: &PgPool,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM job_matches WHERE analyzed_at >= $1 AND match_score >= $2",
        )
        .bind(since)
        .bind(min_score)
        .fetch_one(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_to_low_priority() {
        let m = JobMatch::builder()
            .job_listing_id(ListingId::new())
            .match_score(42)
            .build();
        assert_eq!(m.application_priority, MatchPriority::Low);
        assert!(m.matched_skills.is_empty());
        assert!(m.resume_intake.is_none());
    }
}
