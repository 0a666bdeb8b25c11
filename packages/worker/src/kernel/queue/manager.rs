//! Queue manager: every queue invariant lives here.
//!
//! Sits between the store and the processors. Enqueues are dedup-aware,
//! completions fan out children under the loop guard and depth bound, and
//! failures are settled into retry / park / skip / block transitions.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::backoff::BackoffPolicy;
use super::item::{ItemOrigin, QueueItem, QueueItemStatus, QueueItemType, QueueStep};
use super::store::{QueueStore, TransitionUpdate};
use crate::common::{QueueItemId, SourceId};
use crate::kernel::error::{next_local_day, ProcessError};

/// Result of a dedup-aware enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    /// Work was enqueued, returns the new item id.
    Created(QueueItemId),
    /// Equivalent active work exists, returns its id.
    Duplicate(QueueItemId),
}

impl EnqueueResult {
    pub fn item_id(&self) -> QueueItemId {
        match self {
            EnqueueResult::Created(id) | EnqueueResult::Duplicate(id) => *id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueResult::Created(_))
    }
}

/// The tuple identifying "the same work in flight".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupKey {
    /// Job lane work: keyed on the step plus the normalized listing URL.
    Job { url_normalized: String },
    /// Company lane work: keyed on the step plus the canonical company name.
    Company { canonical_name: String },
    /// Source scrapes: keyed on the source and the hour-granular schedule
    /// bucket, so a source scrapes at most once per bucket.
    ScrapeSource {
        source_id: SourceId,
        bucket: DateTime<Utc>,
    },
}

impl DedupKey {
    /// Stable idempotency key: sha-256 over the canonical tuple string.
    pub fn idempotency_key(&self, item_type: QueueItemType, step: Option<QueueStep>) -> String {
        let step_str = step.map(|s| s.as_str()).unwrap_or("-");
        let tuple = match self {
            DedupKey::Job { url_normalized } => {
                format!("{}:{}:{}", item_type.as_str(), step_str, url_normalized)
            }
            DedupKey::Company { canonical_name } => {
                format!("{}:{}:{}", item_type.as_str(), step_str, canonical_name)
            }
            DedupKey::ScrapeSource { source_id, bucket } => format!(
                "{}:{}:{}",
                item_type.as_str(),
                source_id,
                bucket.format("%Y-%m-%dT%H")
            ),
        };
        hex::encode(Sha256::digest(tuple.as_bytes()))
    }

    /// Truncate to the hour-granular schedule bucket.
    pub fn scrape_bucket(now: DateTime<Utc>) -> DateTime<Utc> {
        use chrono::Timelike;
        now.date_naive()
            .and_hms_opt(now.hour(), 0, 0)
            .expect("whole hour is always valid")
            .and_utc()
    }
}

/// A unit of work to enqueue.
#[derive(Debug, Clone)]
pub struct Submission {
    pub item_type: QueueItemType,
    pub step: Option<QueueStep>,
    pub url: Option<String>,
    pub payload: serde_json::Value,
    pub origin: ItemOrigin,
    pub dedup: Option<DedupKey>,
    pub max_attempts: Option<i32>,
    pub run_at: Option<DateTime<Utc>>,
}

impl Submission {
    pub fn new(item_type: QueueItemType, step: QueueStep) -> Self {
        Self {
            item_type,
            step: Some(step),
            url: None,
            payload: serde_json::Value::Null,
            origin: ItemOrigin::FanOut,
            dedup: None,
            max_attempts: None,
            run_at: None,
        }
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn payload<P: serde::Serialize>(mut self, payload: &P) -> anyhow::Result<Self> {
        self.payload = serde_json::to_value(payload)?;
        Ok(self)
    }

    pub fn origin(mut self, origin: ItemOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn dedup(mut self, key: DedupKey) -> Self {
        self.dedup = Some(key);
        self
    }

    pub fn run_at(mut self, at: DateTime<Utc>) -> Self {
        self.run_at = Some(at);
        self
    }
}

/// Terminal outcome of a successfully processed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Success,
    Filtered,
    Skipped,
}

impl Completion {
    fn status(&self) -> QueueItemStatus {
        match self {
            Completion::Success => QueueItemStatus::Success,
            Completion::Filtered => QueueItemStatus::Filtered,
            Completion::Skipped => QueueItemStatus::Skipped,
        }
    }
}

/// Tunables the manager re-reads from worker settings.
#[derive(Debug, Clone)]
pub struct QueuePolicy {
    pub backoff: BackoffPolicy,
    pub max_depth: i32,
    pub default_max_attempts: i32,
    pub timezone: chrono_tz::Tz,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            max_depth: 8,
            default_max_attempts: 3,
            timezone: chrono_tz::UTC,
        }
    }
}

pub struct QueueManager {
    store: Arc<dyn QueueStore>,
    policy: RwLock<QueuePolicy>,
    /// When a worker last polled for work (health surface).
    last_poll_at: RwLock<Option<DateTime<Utc>>>,
}

impl QueueManager {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self {
            store,
            policy: RwLock::new(QueuePolicy::default()),
            last_poll_at: RwLock::new(None),
        }
    }

    pub fn with_policy(store: Arc<dyn QueueStore>, policy: QueuePolicy) -> Self {
        Self {
            store,
            policy: RwLock::new(policy),
            last_poll_at: RwLock::new(None),
        }
    }

    /// Swap in fresh tunables (called when worker settings change).
    pub fn set_policy(&self, policy: QueuePolicy) {
        *self.policy.write().unwrap_or_else(|e| e.into_inner()) = policy;
    }

    fn policy(&self) -> QueuePolicy {
        self.policy.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    /// Dedup-aware enqueue of root-level work.
    pub async fn submit(&self, submission: Submission) -> Result<EnqueueResult, ProcessError> {
        let item = self.build_item(&submission, None)?;
        self.insert_deduped(item).await
    }

    /// Claim the next ready item for a worker.
    pub async fn claim(
        &self,
        worker_id: &str,
        types: &[QueueItemType],
    ) -> Result<Option<QueueItem>, ProcessError> {
        let now = Utc::now();
        *self.last_poll_at.write().unwrap_or_else(|e| e.into_inner()) = Some(now);
        self.store.claim_next(worker_id, types, now).await
    }

    /// When a worker last asked for work.
    pub fn last_poll_at(&self) -> Option<DateTime<Utc>> {
        *self.last_poll_at.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Move a claimed item into processing before dispatch.
    pub async fn begin(&self, item: &QueueItem) -> Result<QueueItem, ProcessError> {
        self.store
            .transition(
                item.id,
                QueueItemStatus::Claimed,
                QueueItemStatus::Processing,
                TransitionUpdate::default(),
            )
            .await
    }

    /// Terminal transition plus fan-out of children.
    ///
    /// The parent reaches its terminal state first; children are enqueued
    /// after, so a child is never claimable before its parent has settled.
    /// Children run through the loop guard and the dedup check; a guarded or
    /// duplicate child is dropped, not an error.
    pub async fn complete(
        &self,
        item: &QueueItem,
        outcome: Completion,
        fan_out: Vec<Submission>,
    ) -> Result<Vec<EnqueueResult>, ProcessError> {
        let policy = self.policy();

        if !fan_out.is_empty() && item.depth + 1 > policy.max_depth {
            self.block_with(item, ProcessError::MaxDepthExceeded { depth: item.depth + 1 })
                .await?;
            return Err(ProcessError::MaxDepthExceeded {
                depth: item.depth + 1,
            });
        }

        self.store
            .transition(
                item.id,
                item.status,
                outcome.status(),
                TransitionUpdate::clearing_claim(),
            )
            .await?;

        let mut results = Vec::with_capacity(fan_out.len());
        for submission in fan_out {
            let child = self.build_item(&submission, Some(item))?;

            // Loop guard: a (type, step) tuple may occur once per lineage.
            // URL is never part of the tuple: the same URL walking
            // fetch → extract → filter → analyze → save is one lineage.
            if self
                .store
                .lineage_step_exists(child.root_id, child.item_type, child.step, child.id)
                .await?
            {
                warn!(
                    parent = %item.id,
                    item_type = child.item_type.as_str(),
                    step = ?child.step,
                    "loop guard rejected fan-out"
                );
                continue;
            }

            match self.insert_deduped(child).await {
                Ok(result) => results.push(result),
                Err(ProcessError::Conflict { existing }) => {
                    results.push(EnqueueResult::Duplicate(existing))
                }
                Err(err) => return Err(err),
            }
        }

        Ok(results)
    }

    /// Settle a processing failure into the right transition.
    pub async fn settle_failure(
        &self,
        item: &QueueItem,
        err: &ProcessError,
    ) -> Result<(), ProcessError> {
        let policy = self.policy();

        if matches!(err, ProcessError::StaleState) {
            // Lost a transition race; the item is someone else's now.
            debug!(item = %item.id, "stale state during settle, leaving item untouched");
            return Ok(());
        }

        if err.is_terminal_skip() {
            self.store
                .transition(
                    item.id,
                    item.status,
                    QueueItemStatus::Skipped,
                    TransitionUpdate {
                        error_details: Some(error_snapshot(err, item.attempts)),
                        clear_claim: true,
                        ..Default::default()
                    },
                )
                .await?;
            return Ok(());
        }

        if err.is_budget_park() {
            if matches!(err, ProcessError::NoProviderAvailable) {
                warn!(item = %item.id, "no AI provider available; operator attention needed");
            }
            // Parked, not failed: re-runs at the start of the next local day
            // without consuming retry budget.
            let resume_at = next_local_day(Utc::now(), policy.timezone);
            self.store
                .transition(
                    item.id,
                    item.status,
                    QueueItemStatus::Pending,
                    TransitionUpdate {
                        next_attempt_at: Some(resume_at),
                        error_details: Some(error_snapshot(err, item.attempts)),
                        clear_claim: true,
                        rollback_attempt: true,
                    },
                )
                .await?;
            info!(item = %item.id, resume_at = %resume_at, "parked until next budget window");
            return Ok(());
        }

        if matches!(err, ProcessError::MaxDepthExceeded { .. }) {
            self.block_with(item, ProcessError::MaxDepthExceeded { depth: item.depth })
                .await?;
            return Ok(());
        }

        let ceiling = err.attempt_ceiling(item.max_attempts);
        if err.retryable() && item.attempts < ceiling {
            self.retry(item, err).await
        } else {
            self.fail(item, err).await
        }
    }

    /// Schedule another attempt with backoff.
    pub async fn retry(&self, item: &QueueItem, err: &ProcessError) -> Result<(), ProcessError> {
        let policy = self.policy();
        let delay = policy.backoff.delay(item.attempts, err);
        let next_attempt_at = Utc::now() + delay;

        self.store
            .transition(
                item.id,
                item.status,
                QueueItemStatus::Pending,
                TransitionUpdate {
                    next_attempt_at: Some(next_attempt_at),
                    error_details: Some(error_snapshot(err, item.attempts)),
                    clear_claim: true,
                    ..Default::default()
                },
            )
            .await?;

        debug!(
            item = %item.id,
            attempts = item.attempts,
            delay_ms = delay.num_milliseconds(),
            "scheduled retry"
        );
        Ok(())
    }

    /// Terminal failure with the error snapshot preserved for triage.
    pub async fn fail(&self, item: &QueueItem, err: &ProcessError) -> Result<(), ProcessError> {
        self.store
            .transition(
                item.id,
                item.status,
                QueueItemStatus::Failed,
                TransitionUpdate {
                    error_details: Some(error_snapshot(err, item.attempts)),
                    clear_claim: true,
                    ..Default::default()
                },
            )
            .await?;
        warn!(item = %item.id, error = %err, "item failed terminally");
        Ok(())
    }

    /// Terminal block; requires operator action to resume the lineage.
    pub async fn block(&self, item: &QueueItem, reason: &str) -> Result<(), ProcessError> {
        self.store
            .transition(
                item.id,
                item.status,
                QueueItemStatus::Blocked,
                TransitionUpdate {
                    error_details: Some(json!({ "kind": "blocked", "reason": reason })),
                    clear_claim: true,
                    ..Default::default()
                },
            )
            .await?;
        warn!(item = %item.id, reason, "item blocked");
        Ok(())
    }

    async fn block_with(&self, item: &QueueItem, err: ProcessError) -> Result<(), ProcessError> {
        self.store
            .transition(
                item.id,
                item.status,
                QueueItemStatus::Blocked,
                TransitionUpdate {
                    error_details: Some(error_snapshot(&err, item.attempts)),
                    clear_claim: true,
                    ..Default::default()
                },
            )
            .await?;
        warn!(item = %item.id, error = %err, "item blocked");
        Ok(())
    }

    /// Sweep expired claims back to pending.
    pub async fn release_expired(&self, lease_ttl: Duration) -> Result<u64, ProcessError> {
        let released = self.store.release_expired(lease_ttl).await?;
        if released > 0 {
            info!(released, "reclaimed expired leases");
        }
        Ok(released)
    }

    fn build_item(
        &self,
        submission: &Submission,
        parent: Option<&QueueItem>,
    ) -> Result<QueueItem, ProcessError> {
        let policy = self.policy();
        let id = QueueItemId::new();
        let idempotency_key = submission
            .dedup
            .as_ref()
            .map(|k| k.idempotency_key(submission.item_type, submission.step));

        let builder = QueueItem::builder()
            .id(id)
            .item_type(submission.item_type)
            .payload(submission.payload.clone())
            .origin(submission.origin)
            .max_attempts(submission.max_attempts.unwrap_or(policy.default_max_attempts))
            .next_attempt_at(submission.run_at.unwrap_or_else(Utc::now));

        let mut item = match parent {
            Some(p) => builder
                .root_id(p.root_id)
                .parent_id(p.id)
                .depth(p.depth + 1)
                .build(),
            None => builder.root_id(id).build(),
        };
        item.step = submission.step;
        item.url = submission.url.clone();
        item.idempotency_key = idempotency_key;
        Ok(item)
    }

    async fn insert_deduped(&self, item: QueueItem) -> Result<EnqueueResult, ProcessError> {
        if let Some(key) = &item.idempotency_key {
            if let Some(existing) = self.store.find_active_by_key(key).await? {
                debug!(existing = %existing.id, "dedup hit, returning existing item");
                return Ok(EnqueueResult::Duplicate(existing.id));
            }
        }

        match self.store.insert(item).await {
            Ok(inserted) => Ok(EnqueueResult::Created(inserted.id)),
            // Insert race on the unique key: the winner's id is the answer.
            Err(ProcessError::Conflict { existing }) => Ok(EnqueueResult::Duplicate(existing)),
            Err(err) => Err(err),
        }
    }
}

fn error_snapshot(err: &ProcessError, attempts: i32) -> serde_json::Value {
    json!({
        "kind": err.kind(),
        "message": err.to_string(),
        "attempts": attempts,
        "at": Utc::now(),
    })
}
