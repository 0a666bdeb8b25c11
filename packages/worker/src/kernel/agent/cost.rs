//! Daily AI cost ledger.
//!
//! One row per `(date, provider, model)`, accumulated with a conditional
//! upsert. The agent manager consults the ledger before every provider call
//! to enforce the daily budget.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use sqlx::PgPool;

use crate::kernel::error::{from_sqlx, ProcessError};

/// One accumulation into the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct CostEntry {
    pub date: NaiveDate,
    pub provider: String,
    pub model: String,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub cost_usd: f64,
}

/// Aggregate row for reporting.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct CostSummary {
    pub date: NaiveDate,
    pub provider: String,
    pub model: String,
    pub requests: i64,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub cost_usd: f64,
}

#[async_trait]
pub trait CostTracker: Send + Sync {
    /// Total spend for a provider on a date, across models.
    async fn total_for(&self, provider: &str, date: NaiveDate) -> Result<f64, ProcessError>;

    /// Accumulate one call and return the provider's new daily total.
    async fn record(&self, entry: CostEntry) -> Result<f64, ProcessError>;

    /// All rows for a date (stats surface).
    async fn summaries_for(&self, date: NaiveDate) -> Result<Vec<CostSummary>, ProcessError>;
}

// ============================================================================
// Postgres implementation
// ============================================================================

pub struct PostgresCostLedger {
    pool: PgPool,
}

impl PostgresCostLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CostTracker for PostgresCostLedger {
    async fn total_for(&self, provider: &str, date: NaiveDate) -> Result<f64, ProcessError> {
        let total = sqlx::query_scalar::<_, Option<f64>>(
            "SELECT SUM(cost_usd) FROM cost_ledger WHERE provider = $1 AND date = $2",
        )
        .bind(provider)
        .bind(date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| from_sqlx(e, None))?;
        Ok(total.unwrap_or(0.0))
    }

    async fn record(&self, entry: CostEntry) -> Result<f64, ProcessError> {
        sqlx::query(
            r#"
            INSERT INTO cost_ledger (date, provider, model, requests, tokens_in, tokens_out, cost_usd)
            VALUES ($1, $2, $3, 1, $4, $5, $6)
            ON CONFLICT (date, provider, model) DO UPDATE SET
                requests = cost_ledger.requests + 1,
                tokens_in = cost_ledger.tokens_in + EXCLUDED.tokens_in,
                tokens_out = cost_ledger.tokens_out + EXCLUDED.tokens_out,
                cost_usd = cost_ledger.cost_usd + EXCLUDED.cost_usd
            "#,
        )
        .bind(entry.date)
        .bind(&entry.provider)
        .bind(&entry.model)
        .bind(entry.tokens_in)
        .bind(entry.tokens_out)
        .bind(entry.cost_usd)
        .execute(&self.pool)
        .await
        .map_err(|e| from_sqlx(e, None))?;

        self.total_for(&entry.provider, entry.date).await
    }

    async fn summaries_for(&self, date: NaiveDate) -> Result<Vec<CostSummary>, ProcessError> {
        sqlx::query_as::<_, CostSummary>(
            r#"
            SELECT date, provider, model, requests, tokens_in, tokens_out, cost_usd
            FROM cost_ledger
            WHERE date = $1
            ORDER BY provider, model
            "#,
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| from_sqlx(e, None))
    }
}

// ============================================================================
// In-memory implementation (tests)
// ============================================================================

#[derive(Default)]
pub struct MemoryCostLedger {
    rows: Mutex<HashMap<(NaiveDate, String, String), CostSummary>>,
}

impl MemoryCostLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CostTracker for MemoryCostLedger {
    async fn total_for(&self, provider: &str, date: NaiveDate) -> Result<f64, ProcessError> {
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        Ok(rows
            .values()
            .filter(|r| r.provider == provider && r.date == date)
            .map(|r| r.cost_usd)
            .sum())
    }

    async fn record(&self, entry: CostEntry) -> Result<f64, ProcessError> {
        {
            let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
            let row = rows
                .entry((entry.date, entry.provider.clone(), entry.model.clone()))
                .or_insert_with(|| CostSummary {
                    date: entry.date,
                    provider: entry.provider.clone(),
                    model: entry.model.clone(),
                    requests: 0,
                    tokens_in: 0,
                    tokens_out: 0,
                    cost_usd: 0.0,
                });
            row.requests += 1;
            row.tokens_in += entry.tokens_in;
            row.tokens_out += entry.tokens_out;
            row.cost_usd += entry.cost_usd;
        }
        self.total_for(&entry.provider, entry.date).await
    }

    async fn summaries_for(&self, date: NaiveDate) -> Result<Vec<CostSummary>, ProcessError> {
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<CostSummary> = rows.values().filter(|r| r.date == date).cloned().collect();
        out.sort_by(|a, b| (&a.provider, &a.model).cmp(&(&b.provider, &b.model)));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(provider: &str, cost: f64) -> CostEntry {
        CostEntry {
            date: NaiveDate::from_ymd_opt(2025, 6, 15).unwrap(),
            provider: provider.to_string(),
            model: "gpt-4o-mini".to_string(),
            tokens_in: 1000,
            tokens_out: 500,
            cost_usd: cost,
        }
    }

    #[tokio::test]
    async fn record_accumulates_per_provider_day() {
        let ledger = MemoryCostLedger::new();
        assert_eq!(ledger.record(entry("openai", 0.10)).await.unwrap(), 0.10);
        let total = ledger.record(entry("openai", 0.25)).await.unwrap();
        assert!((total - 0.35).abs() < 1e-9);

        let date = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        let rows = ledger.summaries_for(date).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].requests, 2);
        assert_eq!(rows[0].tokens_in, 2000);
    }

    #[tokio::test]
    async fn providers_do_not_share_totals() {
        let ledger = MemoryCostLedger::new();
        ledger.record(entry("openai", 0.10)).await.unwrap();
        ledger.record(entry("anthropic", 0.50)).await.unwrap();

        let date = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        assert!((ledger.total_for("openai", date).await.unwrap() - 0.10).abs() < 1e-9);
        assert!((ledger.total_for("anthropic", date).await.unwrap() - 0.50).abs() < 1e-9);
        assert_eq!(ledger.total_for("missing", date).await.unwrap(), 0.0);
    }
}
