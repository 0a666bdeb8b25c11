//! Queue item model for durable pipeline work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use typed_builder::TypedBuilder;

use crate::common::QueueItemId;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "queue_item_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QueueItemType {
    /// A single job listing moving through fetch → save.
    Job,
    /// Company research and enrichment.
    Company,
    /// A scheduled scrape of one job source.
    ScrapeSource,
    /// Probing a company for scrapeable job sources.
    SourceDiscovery,
    /// Finding new companies from a seed (search results, listings).
    CompanyDiscovery,
}

impl QueueItemType {
    pub const ALL: [QueueItemType; 5] = [
        QueueItemType::Job,
        QueueItemType::Company,
        QueueItemType::ScrapeSource,
        QueueItemType::SourceDiscovery,
        QueueItemType::CompanyDiscovery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemType::Job => "job",
            QueueItemType::Company => "company",
            QueueItemType::ScrapeSource => "scrape_source",
            QueueItemType::SourceDiscovery => "source_discovery",
            QueueItemType::CompanyDiscovery => "company_discovery",
        }
    }
}

/// Granular step within a lane's state machine.
///
/// Each step is a separate queue item; finishing one step fans out the next
/// as a child. This keeps items small and the pipeline restartable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "queue_step", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QueueStep {
    Fetch,
    Extract,
    Filter,
    Analyze,
    Save,
    Enrich,
    DiscoverSources,
    FetchPage,
    Intake,
    UpdateStats,
    Probe,
}

impl QueueStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStep::Fetch => "fetch",
            QueueStep::Extract => "extract",
            QueueStep::Filter => "filter",
            QueueStep::Analyze => "analyze",
            QueueStep::Save => "save",
            QueueStep::Enrich => "enrich",
            QueueStep::DiscoverSources => "discover_sources",
            QueueStep::FetchPage => "fetch_page",
            QueueStep::Intake => "intake",
            QueueStep::UpdateStats => "update_stats",
            QueueStep::Probe => "probe",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default,
)]
#[sqlx(type_name = "queue_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    #[default]
    Pending,
    Claimed,
    Processing,
    Success,
    Failed,
    Skipped,
    Filtered,
    Blocked,
}

impl QueueItemStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueItemStatus::Success
                | QueueItemStatus::Failed
                | QueueItemStatus::Skipped
                | QueueItemStatus::Filtered
                | QueueItemStatus::Blocked
        )
    }

    /// States that hold a worker claim.
    pub fn is_claimed(&self) -> bool {
        matches!(self, QueueItemStatus::Claimed | QueueItemStatus::Processing)
    }
}

/// Where the work came from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default,
)]
#[sqlx(type_name = "item_origin", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ItemOrigin {
    #[default]
    UserSubmission,
    AutomatedScan,
    Scheduled,
    FanOut,
}

// ============================================================================
// Model
// ============================================================================

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct QueueItem {
    #[builder(default = QueueItemId::new())]
    pub id: QueueItemId,

    pub item_type: QueueItemType,
    #[builder(default, setter(strip_option))]
    pub step: Option<QueueStep>,
    #[builder(default)]
    pub status: QueueItemStatus,

    #[builder(default, setter(strip_option))]
    pub url: Option<String>,
    #[builder(default = serde_json::Value::Null)]
    pub payload: serde_json::Value,

    // Lineage
    #[builder(default, setter(strip_option))]
    pub parent_id: Option<QueueItemId>,
    /// Root of the lineage; equals `id` for root items.
    pub root_id: QueueItemId,
    #[builder(default = 0)]
    pub depth: i32,

    // Retry bookkeeping
    #[builder(default = 0)]
    pub attempts: i32,
    #[builder(default = 3)]
    pub max_attempts: i32,
    #[builder(default = Utc::now())]
    pub next_attempt_at: DateTime<Utc>,

    // Claim bookkeeping
    #[builder(default, setter(strip_option))]
    pub claimed_by: Option<String>,
    #[builder(default, setter(strip_option))]
    pub claimed_at: Option<DateTime<Utc>>,

    #[builder(default)]
    pub origin: ItemOrigin,

    #[builder(default, setter(strip_option))]
    pub error_details: Option<serde_json::Value>,
    #[builder(default, setter(strip_option))]
    pub idempotency_key: Option<String>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

const COLUMNS: &str = "id, item_type, step, status, url, payload, parent_id, root_id, depth, \
                       attempts, max_attempts, next_attempt_at, claimed_by, claimed_at, origin, \
                       error_details, idempotency_key, created_at, updated_at";

impl QueueItem {
    /// Whether the item is eligible for a claim at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueItemStatus::Pending
            && self.next_attempt_at <= now
            && self.attempts < self.max_attempts
    }

    /// Deserialize the typed payload for this item.
    pub fn payload_as<P: serde::de::DeserializeOwned>(&self) -> anyhow::Result<P> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| anyhow::anyhow!("invalid payload for item {}: {}", self.id, e))
    }

    pub async fn insert(&self, pool: &PgPool) -> Result<Self, sqlx::Error> {
        let sql = format!(
            r#"
            INSERT INTO queue_items (
                id, item_type, step, status, url, payload, parent_id, root_id, depth,
                attempts, max_attempts, next_attempt_at, claimed_by, claimed_at, origin,
                error_details, idempotency_key, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            RETURNING {COLUMNS}
            "#
        );
        sqlx::query_as::<_, Self>(&sql)
            .bind(self.id)
            .bind(self.item_type)
            .bind(self.step)
            .bind(self.status)
            .bind(&self.url)
            .bind(&self.payload)
            .bind(self.parent_id)
            .bind(self.root_id)
            .bind(self.depth)
            .bind(self.attempts)
            .bind(self.max_attempts)
            .bind(self.next_attempt_at)
            .bind(&self.claimed_by)
            .bind(self.claimed_at)
            .bind(self.origin)
            .bind(&self.error_details)
            .bind(&self.idempotency_key)
            .bind(self.created_at)
            .bind(self.updated_at)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(id: QueueItemId, pool: &PgPool) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!("SELECT {COLUMNS} FROM queue_items WHERE id = $1");
        sqlx::query_as::<_, Self>(&sql).bind(id).fetch_optional(pool).await
    }

    /// Find an active (non-terminal) item carrying the given dedup key.
    pub async fn find_active_by_key(key: &str, pool: &PgPool) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {COLUMNS}
            FROM queue_items
            WHERE idempotency_key = $1
              AND status IN ('pending', 'claimed', 'processing')
            LIMIT 1
            "#
        );
        sqlx::query_as::<_, Self>(&sql).bind(key).fetch_optional(pool).await
    }

    /// Atomically claim the oldest ready item within `types`.
    ///
    /// Single conditional update guarded by `FOR UPDATE SKIP LOCKED`: no two
    /// workers ever claim the same item. FIFO by `created_at` with `id` as
    /// the tie-break; incrementing `attempts` happens here and only here.
    pub async fn claim_next(
        worker_id: &str,
        types: &[QueueItemType],
        now: DateTime<Utc>,
        pool: &PgPool,
    ) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!(
            r#"
            WITH next_item AS (
                SELECT id
                FROM queue_items
                WHERE status = 'pending'
                  AND next_attempt_at <= $3
                  AND attempts < max_attempts
                  AND item_type = ANY($2)
                ORDER BY created_at, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE queue_items
            SET status = 'claimed',
                claimed_by = $1,
                claimed_at = $3,
                attempts = attempts + 1,
                updated_at = $3
            WHERE id IN (SELECT id FROM next_item)
            RETURNING {COLUMNS}
            "#
        );
        sqlx::query_as::<_, Self>(&sql)
            .bind(worker_id)
            .bind(types)
            .bind(now)
            .fetch_optional(pool)
            .await
    }

    /// Return expired claims to the pending pool. The claim's attempt
    /// increment is rolled back so a dead worker does not consume retry
    /// budget.
    pub async fn release_expired(
        lease_cutoff: DateTime<Utc>,
        pool: &PgPool,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE queue_items
            SET status = 'pending',
                claimed_by = NULL,
                claimed_at = NULL,
                attempts = attempts - 1,
                updated_at = NOW()
            WHERE status IN ('claimed', 'processing')
              AND claimed_at < $1
            "#,
        )
        .bind(lease_cutoff)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Whether `(item_type, step)` already occurred in the lineage, excluding
    /// the item itself. URL is deliberately not part of the tuple: the same
    /// URL legitimately revisits every step of a lane.
    pub async fn lineage_step_exists(
        root_id: QueueItemId,
        item_type: QueueItemType,
        step: Option<QueueStep>,
        exclude: QueueItemId,
        pool: &PgPool,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM queue_items
                WHERE root_id = $1
                  AND item_type = $2
                  AND step IS NOT DISTINCT FROM $3
                  AND id <> $4
            )
            "#,
        )
        .bind(root_id)
        .bind(item_type)
        .bind(step)
        .bind(exclude)
        .fetch_one(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_item() -> QueueItem {
        let id = QueueItemId::new();
        QueueItem::builder()
            .id(id)
            .item_type(QueueItemType::Job)
            .step(QueueStep::Fetch)
            .root_id(id)
            .url("https://example.com/jobs/1".to_string())
            .build()
    }

    #[test]
    fn new_item_is_pending_with_three_attempts() {
        let item = sample_item();
        assert_eq!(item.status, QueueItemStatus::Pending);
        assert_eq!(item.attempts, 0);
        assert_eq!(item.max_attempts, 3);
        assert_eq!(item.depth, 0);
    }

    #[test]
    fn ready_requires_due_time_and_attempt_headroom() {
        let mut item = sample_item();
        let now = Utc::now();
        assert!(item.is_ready(now));

        item.next_attempt_at = now + chrono::Duration::minutes(5);
        assert!(!item.is_ready(now));

        item.next_attempt_at = now;
        item.attempts = item.max_attempts;
        assert!(!item.is_ready(now));
    }

    #[test]
    fn terminal_states_are_exactly_five() {
        let terminal: Vec<_> = [
            QueueItemStatus::Pending,
            QueueItemStatus::Claimed,
            QueueItemStatus::Processing,
            QueueItemStatus::Success,
            QueueItemStatus::Failed,
            QueueItemStatus::Skipped,
            QueueItemStatus::Filtered,
            QueueItemStatus::Blocked,
        ]
        .into_iter()
        .filter(|s| s.is_terminal())
        .collect();
        assert_eq!(terminal.len(), 5);
        assert!(!QueueItemStatus::Pending.is_terminal());
    }

    #[test]
    fn claimed_states_hold_a_worker() {
        assert!(QueueItemStatus::Claimed.is_claimed());
        assert!(QueueItemStatus::Processing.is_claimed());
        assert!(!QueueItemStatus::Pending.is_claimed());
        assert!(!QueueItemStatus::Success.is_claimed());
    }

    #[test]
    fn payload_round_trips() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Payload {
            listing_url: String,
        }
        let mut item = sample_item();
        item.payload = serde_json::to_value(Payload {
            listing_url: "https://example.com/jobs/1".into(),
        })
        .unwrap();
        let back: Payload = item.payload_as().unwrap();
        assert_eq!(back.listing_url, "https://example.com/jobs/1");
    }
}
