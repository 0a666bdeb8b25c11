//! Config registry: typed reads over the `app_config` table.
//!
//! Values are cached with a short TTL so hot paths (the worker loop reads
//! worker settings every iteration) don't hammer the database, while edits
//! land within one TTL. `set` writes through and invalidates immediately.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::settings::{
    AiSettings, CandidateProfile, ConfigKey, CostBudget, MatchPolicy, PrefilterPolicy,
    SchedulerSettings, WorkerSettings,
};

#[derive(Clone)]
struct CachedEntry {
    value: serde_json::Value,
    updated_at: Option<DateTime<Utc>>,
    fetched_at: Instant,
}

pub struct ConfigRegistry {
    pool: PgPool,
    cache: Mutex<HashMap<String, CachedEntry>>,
    ttl: Duration,
}

impl ConfigRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            cache: Mutex::new(HashMap::new()),
            ttl: Duration::from_secs(5),
        }
    }

    pub fn with_ttl(pool: PgPool, ttl: Duration) -> Self {
        Self {
            pool,
            cache: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Typed read. Missing or malformed documents fall back to the struct's
    /// defaults; malformed ones additionally log a warning.
    pub async fn get<T: ConfigKey + DeserializeOwned + Default>(&self) -> T {
        match self.raw(T::KEY).await {
            Ok(Some(value)) => match serde_json::from_value::<T>(value) {
                Ok(typed) => typed,
                Err(e) => {
                    warn!(key = T::KEY, error = %e, "malformed config value, using defaults");
                    T::default()
                }
            },
            Ok(None) => T::default(),
            Err(e) => {
                warn!(key = T::KEY, error = %e, "config read failed, using defaults");
                T::default()
            }
        }
    }

    /// Raw JSON read with cache.
    pub async fn raw(&self, key: &str) -> Result<Option<serde_json::Value>> {
        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = cache.get(key) {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(Some(entry.value.clone()));
                }
            }
        }

        let row = sqlx::query_as::<_, (serde_json::Value, DateTime<Utc>)>(
            "SELECT value, updated_at FROM app_config WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .context("reading app_config")?;

        match row {
            Some((value, updated_at)) => {
                let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
                cache.insert(
                    key.to_string(),
                    CachedEntry {
                        value: value.clone(),
                        updated_at: Some(updated_at),
                        fetched_at: Instant::now(),
                    },
                );
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Write a typed value and invalidate the cache entry.
    pub async fn set<T: ConfigKey + Serialize>(&self, value: &T) -> Result<()> {
        self.set_raw(T::KEY, serde_json::to_value(value)?).await
    }

    pub async fn set_raw(&self, key: &str, value: serde_json::Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO app_config (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(&value)
        .execute(&self.pool)
        .await
        .context("writing app_config")?;

        self.invalidate(key);
        Ok(())
    }

    pub fn invalidate(&self, key: &str) {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    /// Preload a value into the cache without touching the database. Served
    /// until the TTL elapses; useful at boot and in tests.
    pub fn prime<T: ConfigKey + Serialize>(&self, value: &T) {
        let json = serde_json::to_value(value).expect("settings structs serialize");
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).insert(
            T::KEY.to_string(),
            CachedEntry {
                value: json,
                updated_at: None,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Poll-based change watch. Invokes `on_change` whenever the key's
    /// `updated_at` advances, until the token is cancelled.
    pub fn watch<F>(
        self: &std::sync::Arc<Self>,
        key: &'static str,
        interval: Duration,
        cancel: CancellationToken,
        mut on_change: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: FnMut(serde_json::Value) + Send + 'static,
    {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut last_seen: Option<DateTime<Utc>> = None;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                registry.invalidate(key);
                if registry.raw(key).await.is_err() {
                    continue;
                }

                let entry = {
                    let cache = registry.cache.lock().unwrap_or_else(|e| e.into_inner());
                    cache.get(key).cloned()
                };
                if let Some(entry) = entry {
                    if entry.updated_at != last_seen {
                        debug!(key, "config changed");
                        last_seen = entry.updated_at;
                        on_change(entry.value);
                    }
                }
            }
        })
    }

    /// Write defaults for any recognized key that is missing, so operators
    /// can edit values in place instead of divining the schema.
    pub async fn seed_defaults(&self) -> Result<()> {
        self.seed_one::<SchedulerSettings>().await?;
        self.seed_one::<AiSettings>().await?;
        self.seed_one::<MatchPolicy>().await?;
        self.seed_one::<PrefilterPolicy>().await?;
        self.seed_one::<WorkerSettings>().await?;
        self.seed_one::<CostBudget>().await?;
        self.seed_one::<CandidateProfile>().await?;
        Ok(())
    }

    async fn seed_one<T: ConfigKey + Serialize + Default>(&self) -> Result<()> {
        if self.raw(T::KEY).await?.is_none() {
            debug!(key = T::KEY, "seeding default config");
            self.set(&T::default()).await?;
        }
        Ok(())
    }
}
