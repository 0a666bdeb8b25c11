//! Queue storage abstraction.
//!
//! `QueueStore` is the narrow contract the queue manager and scheduler rely
//! on. Production uses `PostgresQueueStore` (conditional updates +
//! `FOR UPDATE SKIP LOCKED`); tests use `MemoryQueueStore`, which mirrors the
//! same observable semantics behind a mutex.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use super::item::{QueueItem, QueueItemStatus, QueueItemType, QueueStep};
use crate::common::QueueItemId;
use crate::kernel::error::{from_sqlx, ProcessError};

/// Field changes applied together with a status transition.
#[derive(Debug, Default, Clone)]
pub struct TransitionUpdate {
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub error_details: Option<serde_json::Value>,
    /// Clear `claimed_by`/`claimed_at` (set when leaving a claimed state).
    pub clear_claim: bool,
    /// Undo the claim's attempt increment (parking, not a real attempt).
    pub rollback_attempt: bool,
}

impl TransitionUpdate {
    pub fn clearing_claim() -> Self {
        Self {
            clear_claim: true,
            ..Self::default()
        }
    }
}

/// Filter for queue listings (operator surface).
#[derive(Debug, Default, Clone)]
pub struct QueueFilter {
    pub status: Option<QueueItemStatus>,
    pub item_type: Option<QueueItemType>,
    pub root_id: Option<QueueItemId>,
    pub limit: i64,
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a new item. A unique-violation on the idempotency key surfaces
    /// as `Conflict` with the existing active item's id.
    async fn insert(&self, item: QueueItem) -> Result<QueueItem, ProcessError>;

    async fn find_by_id(&self, id: QueueItemId) -> Result<Option<QueueItem>, ProcessError>;

    /// Find an active (non-terminal) item with this dedup key.
    async fn find_active_by_key(&self, key: &str) -> Result<Option<QueueItem>, ProcessError>;

    /// Claim the oldest ready item within `types`; increments `attempts`.
    async fn claim_next(
        &self,
        worker_id: &str,
        types: &[QueueItemType],
        now: DateTime<Utc>,
    ) -> Result<Option<QueueItem>, ProcessError>;

    /// Conditional transition; fails with `StaleState` when the current
    /// status is not `from`. Terminal states never transition.
    async fn transition(
        &self,
        id: QueueItemId,
        from: QueueItemStatus,
        to: QueueItemStatus,
        update: TransitionUpdate,
    ) -> Result<QueueItem, ProcessError>;

    /// Whether `(item_type, step)` already occurred in the lineage rooted at
    /// `root_id`, not counting `exclude` itself.
    async fn lineage_step_exists(
        &self,
        root_id: QueueItemId,
        item_type: QueueItemType,
        step: Option<QueueStep>,
        exclude: QueueItemId,
    ) -> Result<bool, ProcessError>;

    /// Return items whose claim lease expired to pending; rolls back the
    /// claim's attempt increment. Returns the number released.
    async fn release_expired(&self, lease_ttl: Duration) -> Result<u64, ProcessError>;

    async fn list(&self, filter: QueueFilter) -> Result<Vec<QueueItem>, ProcessError>;

    async fn count_by_status(&self) -> Result<HashMap<QueueItemStatus, i64>, ProcessError>;
}

// ============================================================================
// Postgres implementation
// ============================================================================

pub struct PostgresQueueStore {
    pool: PgPool,
}

impl PostgresQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueStore for PostgresQueueStore {
    async fn insert(&self, item: QueueItem) -> Result<QueueItem, ProcessError> {
        match item.insert(&self.pool).await {
            Ok(inserted) => Ok(inserted),
            Err(err) => {
                // Unique-violation race on the dedup key: surface the winner.
                let is_unique = matches!(&err, sqlx::Error::Database(db) if db.is_unique_violation());
                if is_unique {
                    if let Some(key) = &item.idempotency_key {
                        if let Some(existing) =
                            QueueItem::find_active_by_key(key, &self.pool).await.map_err(|e| from_sqlx(e, None))?
                        {
                            return Err(ProcessError::Conflict {
                                existing: existing.id,
                            });
                        }
                    }
                }
                Err(from_sqlx(err, None))
            }
        }
    }

    async fn find_by_id(&self, id: QueueItemId) -> Result<Option<QueueItem>, ProcessError> {
        QueueItem::find_by_id(id, &self.pool)
            .await
            .map_err(|e| from_sqlx(e, None))
    }

    async fn find_active_by_key(&self, key: &str) -> Result<Option<QueueItem>, ProcessError> {
        QueueItem::find_active_by_key(key, &self.pool)
            .await
            .map_err(|e| from_sqlx(e, None))
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        types: &[QueueItemType],
        now: DateTime<Utc>,
    ) -> Result<Option<QueueItem>, ProcessError> {
        QueueItem::claim_next(worker_id, types, now, &self.pool)
            .await
            .map_err(|e| from_sqlx(e, None))
    }

    async fn transition(
        &self,
        id: QueueItemId,
        from: QueueItemStatus,
        to: QueueItemStatus,
        update: TransitionUpdate,
    ) -> Result<QueueItem, ProcessError> {
        if from.is_terminal() {
            return Err(ProcessError::Internal(anyhow::anyhow!(
                "terminal status {from:?} cannot transition"
            )));
        }
        let sql = r#"
            UPDATE queue_items
            SET status = $3,
                next_attempt_at = COALESCE($4, next_attempt_at),
                error_details = COALESCE($5, error_details),
                claimed_by = CASE WHEN $6 THEN NULL ELSE claimed_by END,
                claimed_at = CASE WHEN $6 THEN NULL ELSE claimed_at END,
                attempts = CASE WHEN $7 THEN GREATEST(attempts - 1, 0) ELSE attempts END,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING id, item_type, step, status, url, payload, parent_id, root_id, depth,
                      attempts, max_attempts, next_attempt_at, claimed_by, claimed_at, origin,
                      error_details, idempotency_key, created_at, updated_at
        "#;
        let updated = sqlx::query_as::<_, QueueItem>(sql)
            .bind(id)
            .bind(from)
            .bind(to)
            .bind(update.next_attempt_at)
            .bind(&update.error_details)
            .bind(update.clear_claim)
            .bind(update.rollback_attempt)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| from_sqlx(e, None))?;

        updated.ok_or(ProcessError::StaleState)
    }

    async fn lineage_step_exists(
        &self,
        root_id: QueueItemId,
        item_type: QueueItemType,
        step: Option<QueueStep>,
        exclude: QueueItemId,
    ) -> Result<bool, ProcessError> {
        QueueItem::lineage_step_exists(root_id, item_type, step, exclude, &self.pool)
            .await
            .map_err(|e| from_sqlx(e, None))
    }

    async fn release_expired(&self, lease_ttl: Duration) -> Result<u64, ProcessError> {
        QueueItem::release_expired(Utc::now() - lease_ttl, &self.pool)
            .await
            .map_err(|e| from_sqlx(e, None))
    }

    async fn list(&self, filter: QueueFilter) -> Result<Vec<QueueItem>, ProcessError> {
        let limit = if filter.limit <= 0 { 100 } else { filter.limit };
        let sql = r#"
            SELECT id, item_type, step, status, url, payload, parent_id, root_id, depth,
                   attempts, max_attempts, next_attempt_at, claimed_by, claimed_at, origin,
                   error_details, idempotency_key, created_at, updated_at
            FROM queue_items
            WHERE ($1::queue_status IS NULL OR status = $1)
              AND ($2::queue_item_type IS NULL OR item_type = $2)
              AND ($3::uuid IS NULL OR root_id = $3)
            ORDER BY created_at DESC
            LIMIT $4
        "#;
        sqlx::query_as::<_, QueueItem>(sql)
            .bind(filter.status)
            .bind(filter.item_type)
            .bind(filter.root_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| from_sqlx(e, None))
    }

    async fn count_by_status(&self) -> Result<HashMap<QueueItemStatus, i64>, ProcessError> {
        let rows = sqlx::query_as::<_, (QueueItemStatus, i64)>(
            "SELECT status, COUNT(*) FROM queue_items GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| from_sqlx(e, None))?;
        Ok(rows.into_iter().collect())
    }
}

// ============================================================================
// In-memory implementation (tests)
// ============================================================================

/// Mutex-guarded map with the same observable semantics as the Postgres
/// store. The whole-map lock stands in for row locking: a claim is a single
/// critical section, so no two claimants can select the same item.
#[derive(Default)]
pub struct MemoryQueueStore {
    items: Mutex<HashMap<QueueItemId, QueueItem>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one item (test inspection).
    pub fn get(&self, id: QueueItemId) -> Option<QueueItem> {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).get(&id).cloned()
    }

    /// Snapshot of all items (test inspection).
    pub fn all(&self) -> Vec<QueueItem> {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn insert(&self, item: QueueItem) -> Result<QueueItem, ProcessError> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(key) = &item.idempotency_key {
            if let Some(existing) = items
                .values()
                .find(|i| i.idempotency_key.as_deref() == Some(key) && !i.status.is_terminal())
            {
                return Err(ProcessError::Conflict {
                    existing: existing.id,
                });
            }
        }
        items.insert(item.id, item.clone());
        Ok(item)
    }

    async fn find_by_id(&self, id: QueueItemId) -> Result<Option<QueueItem>, ProcessError> {
        Ok(self.get(id))
    }

    async fn find_active_by_key(&self, key: &str) -> Result<Option<QueueItem>, ProcessError> {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        Ok(items
            .values()
            .find(|i| i.idempotency_key.as_deref() == Some(key) && !i.status.is_terminal())
            .cloned())
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        types: &[QueueItemType],
        now: DateTime<Utc>,
    ) -> Result<Option<QueueItem>, ProcessError> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        let next_id = items
            .values()
            .filter(|i| i.is_ready(now) && types.contains(&i.item_type))
            .min_by_key(|i| (i.created_at, i.id))
            .map(|i| i.id);

        Ok(next_id.map(|id| {
            let item = items.get_mut(&id).expect("id selected above");
            item.status = QueueItemStatus::Claimed;
            item.claimed_by = Some(worker_id.to_string());
            item.claimed_at = Some(now);
            item.attempts += 1;
            item.updated_at = now;
            item.clone()
        }))
    }

    async fn transition(
        &self,
        id: QueueItemId,
        from: QueueItemStatus,
        to: QueueItemStatus,
        update: TransitionUpdate,
    ) -> Result<QueueItem, ProcessError> {
        if from.is_terminal() {
            return Err(ProcessError::Internal(anyhow::anyhow!(
                "terminal status {from:?} cannot transition"
            )));
        }
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        let item = items.get_mut(&id).ok_or(ProcessError::StaleState)?;
        if item.status != from {
            return Err(ProcessError::StaleState);
        }
        item.status = to;
        if let Some(at) = update.next_attempt_at {
            item.next_attempt_at = at;
        }
        if let Some(details) = update.error_details {
            item.error_details = Some(details);
        }
        if update.clear_claim {
            item.claimed_by = None;
            item.claimed_at = None;
        }
        if update.rollback_attempt {
            item.attempts = (item.attempts - 1).max(0);
        }
        item.updated_at = Utc::now();
        Ok(item.clone())
    }

    async fn lineage_step_exists(
        &self,
        root_id: QueueItemId,
        item_type: QueueItemType,
        step: Option<QueueStep>,
        exclude: QueueItemId,
    ) -> Result<bool, ProcessError> {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        Ok(items.values().any(|i| {
            i.root_id == root_id && i.item_type == item_type && i.step == step && i.id != exclude
        }))
    }

    async fn release_expired(&self, lease_ttl: Duration) -> Result<u64, ProcessError> {
        let cutoff = Utc::now() - lease_ttl;
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        let mut released = 0;
        for item in items.values_mut() {
            if item.status.is_claimed() && item.claimed_at.is_some_and(|at| at < cutoff) {
                item.status = QueueItemStatus::Pending;
                item.claimed_by = None;
                item.claimed_at = None;
                item.attempts -= 1;
                item.updated_at = Utc::now();
                released += 1;
            }
        }
        Ok(released)
    }

    async fn list(&self, filter: QueueFilter) -> Result<Vec<QueueItem>, ProcessError> {
        let limit = if filter.limit <= 0 { 100 } else { filter.limit } as usize;
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        let mut matched: Vec<QueueItem> = items
            .values()
            .filter(|i| filter.status.is_none_or(|s| i.status == s))
            .filter(|i| filter.item_type.is_none_or(|t| i.item_type == t))
            .filter(|i| filter.root_id.is_none_or(|r| i.root_id == r))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matched.truncate(limit);
        Ok(matched)
    }

    async fn count_by_status(&self) -> Result<HashMap<QueueItemStatus, i64>, ProcessError> {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        let mut counts = HashMap::new();
        for item in items.values() {
            *counts.entry(item.status).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn pending_job(url: &str) -> QueueItem {
        let id = QueueItemId::new();
        QueueItem::builder()
            .id(id)
            .item_type(QueueItemType::Job)
            .step(QueueStep::Fetch)
            .root_id(id)
            .url(url.to_string())
            .build()
    }

    #[tokio::test]
    async fn claim_is_fifo_by_created_at() {
        let store = MemoryQueueStore::new();
        let first = pending_job("https://a.example/1");
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = pending_job("https://a.example/2");
        store.insert(second).await.unwrap();
        store.insert(first.clone()).await.unwrap();

        let claimed = store
            .claim_next("w1", &[QueueItemType::Job], Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.claimed_by.as_deref(), Some("w1"));
    }

    #[tokio::test]
    async fn future_next_attempt_is_not_claimable() {
        let store = MemoryQueueStore::new();
        let mut item = pending_job("https://a.example/1");
        item.next_attempt_at = Utc::now() + Duration::minutes(10);
        store.insert(item).await.unwrap();

        let claimed = store
            .claim_next("w1", &[QueueItemType::Job], Utc::now())
            .await
            .unwrap();
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn claim_respects_type_filter() {
        let store = MemoryQueueStore::new();
        store.insert(pending_job("https://a.example/1")).await.unwrap();

        let claimed = store
            .claim_next("w1", &[QueueItemType::Company], Utc::now())
            .await
            .unwrap();
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn no_double_claim_under_concurrency() {
        let store = Arc::new(MemoryQueueStore::new());
        for i in 0..20 {
            store
                .insert(pending_job(&format!("https://a.example/{i}")))
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for w in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                loop {
                    match store
                        .claim_next(&format!("w{w}"), &[QueueItemType::Job], Utc::now())
                        .await
                        .unwrap()
                    {
                        Some(item) => claimed.push(item.id),
                        None => break,
                    }
                }
                claimed
            }));
        }

        let mut all: Vec<QueueItemId> = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        let unique: std::collections::HashSet<_> = all.iter().copied().collect();
        assert_eq!(all.len(), 20, "every item claimed exactly once");
        assert_eq!(unique.len(), 20, "no item claimed twice");
    }

    #[tokio::test]
    async fn terminal_states_never_transition() {
        let store = MemoryQueueStore::new();
        let item = pending_job("https://a.example/1");
        store.insert(item.clone()).await.unwrap();
        store
            .claim_next("w1", &[QueueItemType::Job], Utc::now())
            .await
            .unwrap()
            .unwrap();
        store
            .transition(
                item.id,
                QueueItemStatus::Claimed,
                QueueItemStatus::Success,
                TransitionUpdate::clearing_claim(),
            )
            .await
            .unwrap();

        let err = store
            .transition(
                item.id,
                QueueItemStatus::Success,
                QueueItemStatus::Pending,
                TransitionUpdate::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Internal(_)));
        assert_eq!(store.get(item.id).unwrap().status, QueueItemStatus::Success);
    }

    #[tokio::test]
    async fn transition_from_wrong_status_is_stale() {
        let store = MemoryQueueStore::new();
        let item = pending_job("https://a.example/1");
        store.insert(item.clone()).await.unwrap();

        let err = store
            .transition(
                item.id,
                QueueItemStatus::Processing,
                QueueItemStatus::Success,
                TransitionUpdate::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::StaleState));
    }

    #[tokio::test]
    async fn duplicate_active_key_conflicts_with_existing_id() {
        let store = MemoryQueueStore::new();
        let mut first = pending_job("https://a.example/1");
        first.idempotency_key = Some("k1".into());
        store.insert(first.clone()).await.unwrap();

        let mut second = pending_job("https://a.example/1");
        second.idempotency_key = Some("k1".into());
        let err = store.insert(second).await.unwrap_err();
        match err {
            ProcessError::Conflict { existing } => assert_eq!(existing, first.id),
            other => panic!("expected Conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn terminal_item_frees_its_dedup_key() {
        let store = MemoryQueueStore::new();
        let mut first = pending_job("https://a.example/1");
        first.idempotency_key = Some("k1".into());
        store.insert(first.clone()).await.unwrap();

        // Drive to terminal through the claimed path
        store
            .claim_next("w1", &[QueueItemType::Job], Utc::now())
            .await
            .unwrap()
            .unwrap();
        store
            .transition(
                first.id,
                QueueItemStatus::Claimed,
                QueueItemStatus::Success,
                TransitionUpdate::clearing_claim(),
            )
            .await
            .unwrap();

        let mut second = pending_job("https://a.example/1");
        second.idempotency_key = Some("k1".into());
        assert!(store.insert(second).await.is_ok());
    }

    #[tokio::test]
    async fn release_expired_restores_pending_and_attempts() {
        let store = MemoryQueueStore::new();
        let item = pending_job("https://a.example/1");
        store.insert(item.clone()).await.unwrap();
        store
            .claim_next("w1", &[QueueItemType::Job], Utc::now())
            .await
            .unwrap()
            .unwrap();

        // Fresh claim: nothing to release yet
        assert_eq!(store.release_expired(Duration::minutes(5)).await.unwrap(), 0);

        // Zero TTL: the claim is expired immediately
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        assert_eq!(store.release_expired(Duration::zero()).await.unwrap(), 1);

        let released = store.get(item.id).unwrap();
        assert_eq!(released.status, QueueItemStatus::Pending);
        assert_eq!(released.attempts, 0, "crashed claim does not consume budget");
        assert!(released.claimed_by.is_none());
    }

    #[tokio::test]
    async fn lineage_lookup_matches_type_and_step_only() {
        let store = MemoryQueueStore::new();
        let root = pending_job("https://a.example/1");
        let root_id = root.id;
        store.insert(root).await.unwrap();

        let mut child = pending_job("https://a.example/1");
        child.root_id = root_id;
        child.step = Some(QueueStep::Extract);
        let child_id = child.id;
        store.insert(child).await.unwrap();

        // Same URL, different step: not a repeat
        assert!(!store
            .lineage_step_exists(root_id, QueueItemType::Job, Some(QueueStep::Filter), child_id)
            .await
            .unwrap());
        // Same step elsewhere in the lineage: a repeat
        assert!(store
            .lineage_step_exists(root_id, QueueItemType::Job, Some(QueueStep::Fetch), child_id)
            .await
            .unwrap());
    }
}
