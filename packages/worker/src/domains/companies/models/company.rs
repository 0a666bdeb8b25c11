//! Company model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use typed_builder::TypedBuilder;

use crate::common::{canonical_company_name, CompanyId};

/// Rough desirability tier, assigned during enrichment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "company_tier", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CompanyTier {
    S,
    A,
    B,
    #[default]
    C,
    D,
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Company {
    #[builder(default = CompanyId::new())]
    pub id: CompanyId,

    pub name: String,
    /// Dedup key: lowercased, punctuation-stripped, legal suffixes removed.
    pub canonical_name: String,

    #[builder(default, setter(strip_option))]
    pub website: Option<String>,
    #[builder(default, setter(strip_option))]
    pub about: Option<String>,
    #[builder(default)]
    pub tech_stack: Vec<String>,
    #[builder(default)]
    pub tier: CompanyTier,
    #[builder(default = 0)]
    pub priority_score: i32,
    #[builder(default, setter(strip_option))]
    pub has_portland_office: Option<bool>,

    /// Raw enrichment facts from the extraction step, kept for audit.
    #[builder(default, setter(strip_option))]
    pub enrichment: Option<serde_json::Value>,
    #[builder(default, setter(strip_option))]
    pub enriched_at: Option<DateTime<Utc>>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

const COLUMNS: &str = "id, name, canonical_name, website, about, tech_stack, tier, \
                       priority_score, has_portland_office, enrichment, enriched_at, \
                       created_at, updated_at";

impl Company {
    pub fn from_name(name: &str) -> Self {
        Self::builder()
            .name(name.to_string())
            .canonical_name(canonical_company_name(name))
            .build()
    }

    /// Insert-or-merge keyed on the canonical name. Enrichment fields only
    /// move forward: a bare mention never wipes earlier research.
    pub async fn upsert_by_canonical_name(&self, pool: &PgPool) -> Result<Self, sqlx::Error> {
        let sql = format!(
            r#"
            INSERT INTO companies (
                id, name, canonical_name, website, about, tech_stack, tier, priority_score,
                has_portland_office, enrichment, enriched_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (canonical_name) DO UPDATE SET
                website = COALESCE(EXCLUDED.website, companies.website),
                about = COALESCE(EXCLUDED.about, companies.about),
                tech_stack = CASE WHEN cardinality(EXCLUDED.tech_stack) > 0
                                  THEN EXCLUDED.tech_stack ELSE companies.tech_stack END,
                tier = CASE WHEN EXCLUDED.enriched_at IS NOT NULL
                            THEN EXCLUDED.tier ELSE companies.tier END,
                priority_score = GREATEST(EXCLUDED.priority_score, companies.priority_score),
                has_portland_office = COALESCE(EXCLUDED.has_portland_office, companies.has_portland_office),
                enrichment = COALESCE(EXCLUDED.enrichment, companies.enrichment),
                enriched_at = COALESCE(EXCLUDED.enriched_at, companies.enriched_at),
                updated_at = NOW()
            RETURNING {COLUMNS}
            "#
        );
        sqlx::query_as::<_, Self>(&sql)
            .bind(self.id)
            .bind(&self.name)
            .bind(&self.canonical_name)
            .bind(&self.website)
            .bind(&self.about)
            .bind(&self.tech_stack)
            .bind(self.tier)
            .bind(self.priority_score)
            .bind(self.has_portland_office)
            .bind(&self.enrichment)
            .bind(self.enriched_at)
            .bind(self.created_at)
            .bind(self.updated_at)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(id: CompanyId, pool: &PgPool) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!("SELECT {COLUMNS} FROM companies WHERE id = $1");
        sqlx::query_as::<_, Self>(&sql).bind(id).fetch_optional(pool).await
    }

    pub async fn find_by_canonical_name(
        canonical_name: &str,
        pool: &PgPool,
    ) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!("SELECT {COLUMNS} FROM companies WHERE canonical_name = $1");
        sqlx::query_as::<_, Self>(&sql)
            .bind(canonical_name)
            .fetch_optional(pool)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_name_canonicalizes() {
        let company = Company::from_name("Acme, Inc.");
        assert_eq!(company.name, "Acme, Inc.");
        assert_eq!(company.canonical_name, "acme");
        assert_eq!(company.tier, CompanyTier::C);
        assert!(company.enriched_at.is_none());
    }

    #[test]
    fn name_variants_share_a_canonical_key() {
        assert_eq!(
            Company::from_name("ACME INC").canonical_name,
            Company::from_name("Acme, Inc.").canonical_name,
        );
    }
}
