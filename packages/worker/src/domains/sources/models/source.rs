//! Job source model: a board, feed or career page scraped on schedule.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use typed_builder::TypedBuilder;

use crate::common::{CompanyId, SourceId};

/// Failures in a row before the circuit breaker opens.
pub const CIRCUIT_BREAK_THRESHOLD: i32 = 5;
/// How long a broken source stays out of rotation.
pub const CIRCUIT_BREAK_COOLDOWN_HOURS: i64 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "source_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Greenhouse,
    Lever,
    Workday,
    Rss,
    Api,
    #[default]
    Html,
    CompanyPage,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Greenhouse => "greenhouse",
            SourceType::Lever => "lever",
            SourceType::Workday => "workday",
            SourceType::Rss => "rss",
            SourceType::Api => "api",
            SourceType::Html => "html",
            SourceType::CompanyPage => "company_page",
        }
    }
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct JobSource {
    #[builder(default = SourceId::new())]
    pub id: SourceId,

    pub name: String,
    pub url: String,
    #[builder(default)]
    pub source_type: SourceType,
    /// Type-specific settings, opaque to the core.
    #[builder(default = serde_json::Value::Null)]
    pub config: serde_json::Value,
    #[builder(default = true)]
    pub enabled: bool,
    #[builder(default, setter(strip_option))]
    pub company_id: Option<CompanyId>,

    // Scrape bookkeeping
    #[builder(default, setter(strip_option))]
    pub last_scraped_at: Option<DateTime<Utc>>,
    #[builder(default = 0)]
    pub total_jobs_found: i64,
    #[builder(default = 0)]
    pub total_jobs_matched: i64,

    // Circuit breaker
    #[builder(default = 0)]
    pub consecutive_failures: i32,
    #[builder(default, setter(strip_option))]
    pub disabled_until: Option<DateTime<Utc>>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

const COLUMNS: &str = "id, name, url, source_type, config, enabled, company_id, last_scraped_at, \
                       total_jobs_found, total_jobs_matched, consecutive_failures, disabled_until, \
                       created_at, updated_at";

impl JobSource {
    /// Whether the circuit breaker currently holds this source out.
    pub fn circuit_broken(&self, now: DateTime<Utc>) -> bool {
        self.disabled_until.is_some_and(|until| until > now)
    }

    pub async fn upsert_by_url(&self, pool: &PgPool) -> Result<Self, sqlx::Error> {
        let sql = format!(
            r#"
            INSERT INTO job_sources (
                id, name, url, source_type, config, enabled, company_id, last_scraped_at,
                total_jobs_found, total_jobs_matched, consecutive_failures, disabled_until,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (url) DO UPDATE SET
                name = EXCLUDED.name,
                source_type = EXCLUDED.source_type,
                config = EXCLUDED.config,
                enabled = EXCLUDED.enabled,
                company_id = COALESCE(EXCLUDED.company_id, job_sources.company_id),
                updated_at = NOW()
            RETURNING {COLUMNS}
            "#
        );
        sqlx::query_as::<_, Self>(&sql)
            .bind(self.id)
            .bind(&self.name)
            .bind(&self.url)
            .bind(self.source_type)
            .bind(&self.config)
            .bind(self.enabled)
            .bind(self.company_id)
            .bind(self.last_scraped_at)
            .bind(self.total_jobs_found)
            .bind(self.total_jobs_matched)
            .bind(self.consecutive_failures)
            .bind(self.disabled_until)
            .bind(self.created_at)
            .bind(self.updated_at)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(id: SourceId, pool: &PgPool) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!("SELECT {COLUMNS} FROM job_sources WHERE id = $1");
        sqlx::query_as::<_, Self>(&sql).bind(id).fetch_optional(pool).await
    }

    /// Sources due for a scrape: enabled, circuit closed, cooldown elapsed.
    /// Least-recently-scraped first, never-scraped before everything.
    pub async fn find_due_for_scraping(
        cooldown: Duration,
        limit: i64,
        pool: &PgPool,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {COLUMNS} FROM job_sources
            WHERE enabled = true
              AND (disabled_until IS NULL OR disabled_until <= NOW())
              AND (last_scraped_at IS NULL OR last_scraped_at <= $1)
            ORDER BY last_scraped_at ASC NULLS FIRST
            LIMIT $2
            "#
        );
        sqlx::query_as::<_, Self>(&sql)
            .bind(Utc::now() - cooldown)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// A successful scrape closes the breaker and bumps the tallies.
    pub async fn record_scrape_success(
        id: SourceId,
        jobs_found: i64,
        pool: &PgPool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE job_sources
            SET last_scraped_at = NOW(),
                total_jobs_found = total_jobs_found + $2,
                consecutive_failures = 0,
                disabled_until = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(jobs_found)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// A failed scrape counts toward the breaker; at the threshold the
    /// source leaves rotation for the cooldown window.
    pub async fn record_scrape_failure(id: SourceId, pool: &PgPool) -> Result<i32, sqlx::Error> {
        let failures = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE job_sources
            SET consecutive_failures = consecutive_failures + 1,
                disabled_until = CASE
                    WHEN consecutive_failures + 1 >= $2
                    THEN NOW() + make_interval(hours => $3::int)
                    ELSE disabled_until
                END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING consecutive_failures
            "#,
        )
        .bind(id)
        .bind(CIRCUIT_BREAK_THRESHOLD)
        .bind(CIRCUIT_BREAK_COOLDOWN_HOURS as i32)
        .fetch_one(pool)
        .await?;
        Ok(failures)
    }

    pub async fn record_matches(id: SourceId, matched: i64, pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE job_sources
            SET total_jobs_matched = total_jobs_matched + $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(matched)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn list(enabled_only: bool, pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {COLUMNS} FROM job_sources
            WHERE ($1 = false OR enabled = true)
            ORDER BY name
            "#
        );
        sqlx::query_as::<_, Self>(&sql).bind(enabled_only).fetch_all(pool).await
    }

    pub async fn count_circuit_broken(pool: &PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM job_sources WHERE disabled_until > NOW()",
        )
        .fetch_one(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_source_has_closed_breaker() {
        let source = JobSource::builder()
            .name("Acme careers".to_string())
            .url("https://acme.example/careers".to_string())
            .build();
        assert!(source.enabled);
        assert_eq!(source.consecutive_failures, 0);
        assert!(!source.circuit_broken(Utc::now()));
    }

    #[test]
    fn breaker_state_follows_disabled_until() {
        let mut source = JobSource::builder()
            .name("Acme careers".to_string())
            .url("https://acme.example/careers".to_string())
            .build();
        let now = Utc::now();

        source.disabled_until = Some(now + Duration::hours(1));
        assert!(source.circuit_broken(now));

        source.disabled_until = Some(now - Duration::hours(1));
        assert!(!source.circuit_broken(now));
    }
}
