//! Job listing model.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use typed_builder::TypedBuilder;

use crate::common::{CompanyId, ListingId, SourceId};

/// Listing lifecycle. Advances monotonically; `Filtered`, `Analyzed` and
/// `Skipped` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "listing_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    #[default]
    Pending,
    Filtered,
    Analyzing,
    Analyzed,
    Skipped,
}

impl ListingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ListingStatus::Filtered | ListingStatus::Analyzed | ListingStatus::Skipped
        )
    }
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct JobListing {
    #[builder(default = ListingId::new())]
    pub id: ListingId,

    /// Normalized URL; the listing's natural key.
    pub url_normalized: String,
    #[builder(default, setter(strip_option))]
    pub source_id: Option<SourceId>,
    #[builder(default, setter(strip_option))]
    pub company_id: Option<CompanyId>,

    pub title: String,
    pub company_name: String,
    #[builder(default, setter(strip_option))]
    pub location: Option<String>,
    #[builder(default, setter(strip_option))]
    pub salary_range: Option<String>,
    /// Markdown body the extraction and analysis steps work on.
    #[builder(default)]
    pub description: String,
    #[builder(default, setter(strip_option))]
    pub posted_date: Option<NaiveDate>,

    #[builder(default)]
    pub status: ListingStatus,
    /// Pre-filter verdict, kept for audit.
    #[builder(default, setter(strip_option))]
    pub filter_result: Option<serde_json::Value>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

const COLUMNS: &str = "id, url_normalized, source_id, company_id, title, company_name, location, \
                       salary_range, description, posted_date, status, filter_result, \
                       created_at, updated_at";

impl JobListing {
    /// Insert-or-update keyed on the normalized URL. A re-fetch refreshes
    /// content fields but never regresses `status`.
    pub async fn upsert_by_url(&self, pool: &PgPool) -> Result<Self, sqlx::Error> {
        let sql = format!(
            r#"
            INSERT INTO job_listings (
                id, url_normalized, source_id, company_id, title, company_name, location,
                salary_range, description, posted_date, status, filter_result, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (url_normalized) DO UPDATE SET
                source_id = COALESCE(EXCLUDED.source_id, job_listings.source_id),
                company_id = COALESCE(EXCLUDED.company_id, job_listings.company_id),
                title = EXCLUDED.title,
                company_name = EXCLUDED.company_name,
                location = COALESCE(EXCLUDED.location, job_listings.location),
                salary_range = COALESCE(EXCLUDED.salary_range, job_listings.salary_range),
                description = EXCLUDED.description,
                posted_date = COALESCE(EXCLUDED.posted_date, job_listings.posted_date),
                updated_at = NOW()
            RETURNING {COLUMNS}
            "#
        );
        sqlx::query_as::<_, Self>(&sql)
            .bind(self.id)
            .bind(&self.url_normalized)
            .bind(self.source_id)
            .bind(self.company_id)
            .bind(&self.title)
            .bind(&self.company_name)
            .bind(&self.location)
            .bind(&self.salary_range)
            .bind(&self.description)
            .bind(self.posted_date)
            .bind(self.status)
            .bind(&self.filter_result)
            .bind(self.created_at)
            .bind(self.updated_at)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(id: ListingId, pool: &PgPool) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!("SELECT {COLUMNS} FROM job_listings WHERE id = $1");
        sqlx::query_as::<_, Self>(&sql).bind(id).fetch_optional(pool).await
    }

    pub async fn find_by_url(url_normalized: &str, pool: &PgPool) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!("SELECT {COLUMNS} FROM job_listings WHERE url_normalized = $1");
        sqlx::query_as::<_, Self>(&sql)
            .bind(url_normalized)
            .fetch_optional(pool)
            .await
    }

    /// Conditional status advance; returns false when the row was not in
    /// `from` (concurrent advance, replay of an already-finished step).
    pub async fn advance_status(
        id: ListingId,
        from: ListingStatus,
        to: ListingStatus,
        pool: &PgPool,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE job_listings SET status = $3, updated_at = NOW() WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_filter_result(
        id: ListingId,
        filter_result: &serde_json::Value,
        pool: &PgPool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE job_listings SET filter_result = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(filter_result)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn list(
        status: Option<ListingStatus>,
        limit: i64,
        pool: &PgPool,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {COLUMNS} FROM job_listings
            WHERE ($1::listing_status IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#
        );
        sqlx::query_as::<_, Self>(&sql)
            .bind(status)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    pub async fn count_by_status(pool: &PgPool) -> Result<Vec<(ListingStatus, i64)>, sqlx::Error> {
        sqlx::query_as::<_, (ListingStatus, i64)>(
            "SELECT status, COUNT(*) FROM job_listings GROUP BY status",
        )
        .fetch_all(pool)
        .await
    }
}
