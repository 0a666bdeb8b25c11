//! Error taxonomy for pipeline processing.
//!
//! Every recoverable failure a processor can hit maps onto one of these
//! kinds; the worker's settle step turns the kind into a queue transition
//! (retry with backoff, terminal skip, park until tomorrow, block). Only
//! `Internal` escapes to the worker loop as a genuine bug.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::common::QueueItemId;

#[derive(Debug, Error)]
pub enum ProcessError {
    /// Network timeout, 5xx, connection reset. Retry with backoff.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Bot wall, 429, CAPTCHA. Retry with a longer backoff floor and count
    /// against the source's circuit breaker.
    #[error("blocked by remote: {0}")]
    Blocked(String),

    /// 404 on a listing. Terminal skip, not surfaced as an error upstream.
    #[error("resource not found")]
    NotFound,

    /// 410 on a listing. Terminal skip.
    #[error("resource gone")]
    Gone,

    /// Mandatory fields could not be extracted. Retried a small number of
    /// times, then failed with the reason preserved.
    #[error("parse failure: {0}")]
    Parse(String),

    /// Daily AI spend ceiling reached for every usable provider. The item is
    /// parked until the next local day.
    #[error("daily budget exhausted for provider {provider}")]
    BudgetExhausted { provider: String },

    /// Every provider in the fallback chain is disabled or failing.
    #[error("no AI provider available")]
    NoProviderAvailable,

    /// A conditional transition lost a race. Not an attempt; the item is
    /// re-claimed on a later poll.
    #[error("stale queue state")]
    StaleState,

    /// Lineage exceeded the configured depth bound.
    #[error("lineage depth {depth} exceeds maximum")]
    MaxDepthExceeded { depth: i32 },

    /// Dedup hit: equivalent active work already exists. Swallowed by
    /// callers, which receive the existing item id.
    #[error("duplicate of active item {existing}")]
    Conflict { existing: QueueItemId },

    /// Programming-error-class failure. Propagates to the worker, which
    /// snapshots it onto the item and marks it failed.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ProcessError {
    /// Whether the worker should schedule another attempt (attempts
    /// permitting).
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ProcessError::Transient(_) | ProcessError::Blocked(_) | ProcessError::Parse(_)
        )
    }

    /// Whether the failure ends the item as SKIPPED rather than FAILED.
    pub fn is_terminal_skip(&self) -> bool {
        matches!(self, ProcessError::NotFound | ProcessError::Gone)
    }

    /// Whether the item should be parked until the next budget window
    /// instead of burning an attempt.
    pub fn is_budget_park(&self) -> bool {
        matches!(
            self,
            ProcessError::BudgetExhausted { .. } | ProcessError::NoProviderAvailable
        )
    }

    /// Parse failures retry fewer times than the item's own ceiling.
    pub fn attempt_ceiling(&self, max_attempts: i32) -> i32 {
        match self {
            ProcessError::Parse(_) => max_attempts.min(3),
            _ => max_attempts,
        }
    }

    /// Compact reason tag recorded in `error_details`.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessError::Transient(_) => "transient",
            ProcessError::Blocked(_) => "blocked",
            ProcessError::NotFound => "not_found",
            ProcessError::Gone => "gone",
            ProcessError::Parse(_) => "parse",
            ProcessError::BudgetExhausted { .. } => "budget_exhausted",
            ProcessError::NoProviderAvailable => "no_provider",
            ProcessError::StaleState => "stale_state",
            ProcessError::MaxDepthExceeded { .. } => "max_depth_exceeded",
            ProcessError::Conflict { .. } => "conflict",
            ProcessError::Internal(_) => "internal",
        }
    }
}

/// Map database errors onto the taxonomy: unique violations are dedup
/// signals, everything else is transport and retryable.
pub fn from_sqlx(err: sqlx::Error, existing: Option<QueueItemId>) -> ProcessError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => match existing {
            Some(id) => ProcessError::Conflict { existing: id },
            None => ProcessError::Transient("unique violation race".into()),
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => ProcessError::Transient(err.to_string()),
        _ => ProcessError::Internal(err.into()),
    }
}

/// Start of the next local day, used to park budget-exhausted work.
pub fn next_local_day(now: DateTime<Utc>, tz: chrono_tz::Tz) -> DateTime<Utc> {
    let local = now.with_timezone(&tz);
    let next = (local.date_naive() + chrono::Duration::days(1))
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid");
    next.and_local_timezone(tz)
        .earliest()
        // DST gap at midnight: fall forward an hour
        .or_else(|| (next + chrono::Duration::hours(1)).and_local_timezone(tz).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now + chrono::Duration::days(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_and_blocked_retry() {
        assert!(ProcessError::Transient("timeout".into()).retryable());
        assert!(ProcessError::Blocked("429".into()).retryable());
        assert!(!ProcessError::NotFound.retryable());
        assert!(!ProcessError::StaleState.retryable());
    }

    #[test]
    fn not_found_and_gone_are_terminal_skips() {
        assert!(ProcessError::NotFound.is_terminal_skip());
        assert!(ProcessError::Gone.is_terminal_skip());
        assert!(!ProcessError::Transient("x".into()).is_terminal_skip());
    }

    #[test]
    fn parse_errors_cap_attempts_at_three() {
        let err = ProcessError::Parse("missing title".into());
        assert_eq!(err.attempt_ceiling(10), 3);
        assert_eq!(err.attempt_ceiling(2), 2);
        assert_eq!(ProcessError::Transient("x".into()).attempt_ceiling(10), 10);
    }

    #[test]
    fn budget_kinds_park() {
        assert!(ProcessError::BudgetExhausted {
            provider: "openai".into()
        }
        .is_budget_park());
        assert!(ProcessError::NoProviderAvailable.is_budget_park());
    }

    #[test]
    fn next_local_day_is_midnight_in_zone() {
        let now = "2025-06-15T20:30:00Z".parse::<DateTime<Utc>>().unwrap();
        let next = next_local_day(now, chrono_tz::America::Los_Angeles);
        let local = next.with_timezone(&chrono_tz::America::Los_Angeles);
        assert_eq!(local.format("%H:%M:%S").to_string(), "00:00:00");
        assert!(next > now);
    }
}
