//! Agent manager: provider-agnostic LLM invocation.
//!
//! Walks the configured fallback chain for a `(scope, prompt)` call, skipping
//! providers that are disabled for the scope or over their daily budget.
//! Auth and quota failures disable the provider for the calling scope for
//! the rest of the process lifetime; transient failures just move the chain
//! along. Successful calls land in the cost ledger.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::cost::{CostEntry, CostTracker};
use crate::kernel::config::{AiSettings, ConfigRegistry, CostBudget, SchedulerSettings};
use crate::kernel::error::ProcessError;
use crate::kernel::traits::{BaseAgent, ChatResponse, ProviderError};

pub struct AgentManager {
    providers: HashMap<String, Arc<dyn BaseAgent>>,
    registry: Arc<ConfigRegistry>,
    ledger: Arc<dyn CostTracker>,
    /// `(scope, provider)` pairs disabled for the process lifetime.
    disabled: Mutex<HashSet<(String, String)>>,
}

impl AgentManager {
    pub fn new(registry: Arc<ConfigRegistry>, ledger: Arc<dyn CostTracker>) -> Self {
        Self {
            providers: HashMap::new(),
            registry,
            ledger,
            disabled: Mutex::new(HashSet::new()),
        }
    }

    /// Register a provider under its `name()`.
    pub fn with_provider(mut self, provider: Arc<dyn BaseAgent>) -> Self {
        self.providers.insert(provider.name().to_string(), provider);
        self
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    /// Whether a provider is runtime-disabled for a scope.
    pub fn is_disabled(&self, scope: &str, provider: &str) -> bool {
        self.disabled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&(scope.to_string(), provider.to_string()))
    }

    fn disable(&self, scope: &str, provider: &str) {
        self.disabled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((scope.to_string(), provider.to_string()));
    }

    /// Invoke the LLM capability for a scope, walking the fallback chain.
    ///
    /// Settings are re-read on every call so config edits apply to the next
    /// invocation without a restart.
    pub async fn invoke(&self, scope: &str, prompt: &str) -> Result<ChatResponse, ProcessError> {
        let ai: AiSettings = self.registry.get().await;
        let budget: CostBudget = self.registry.get().await;
        let tz = self.registry.get::<SchedulerSettings>().await.tz();
        let today = Utc::now().with_timezone(&tz).date_naive();

        if !ai.scope_enabled(scope) {
            debug!(scope, "AI disabled for scope");
            return Err(ProcessError::NoProviderAvailable);
        }

        let mut budget_hit: Option<String> = None;

        for name in &ai.fallback_chain {
            let Some(provider) = self.providers.get(name) else {
                warn!(provider = %name, "fallback chain names an unregistered provider");
                continue;
            };

            if self.is_disabled(scope, name) {
                debug!(scope, provider = %name, "provider disabled for scope, skipping");
                continue;
            }

            let spent = self.ledger.total_for(name, today).await?;
            let limit = budget.limit_for(name);
            if spent >= limit {
                info!(provider = %name, spent, limit, "daily budget reached, skipping provider");
                budget_hit = Some(name.clone());
                continue;
            }

            let model = ai.provider_models.get(name).map(String::as_str);
            match provider.complete(prompt, model).await {
                Ok(response) => {
                    let rate = ai.rate_for(&response.model);
                    let cost = response.usage.tokens_in as f64 / 1000.0 * rate.input_per_1k
                        + response.usage.tokens_out as f64 / 1000.0 * rate.output_per_1k;

                    let total = self
                        .ledger
                        .record(CostEntry {
                            date: today,
                            provider: name.clone(),
                            model: response.model.clone(),
                            tokens_in: response.usage.tokens_in,
                            tokens_out: response.usage.tokens_out,
                            cost_usd: cost,
                        })
                        .await?;

                    debug!(
                        scope,
                        provider = %name,
                        model = %response.model,
                        cost_usd = cost,
                        daily_total_usd = total,
                        "agent call succeeded"
                    );
                    return Ok(response);
                }
                Err(ProviderError::Auth(msg)) | Err(ProviderError::Quota(msg)) => {
                    warn!(
                        scope,
                        provider = %name,
                        error = %msg,
                        "disabling provider for scope"
                    );
                    self.disable(scope, name);
                }
                Err(ProviderError::Transient(msg)) | Err(ProviderError::Invalid(msg)) => {
                    warn!(scope, provider = %name, error = %msg, "provider failed, trying next");
                }
            }
        }

        match budget_hit {
            Some(provider) => Err(ProcessError::BudgetExhausted { provider }),
            None => Err(ProcessError::NoProviderAvailable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::agent::cost::{CostEntry, MemoryCostLedger};
    use crate::kernel::config::ModelRate;
    use crate::kernel::test_dependencies::{MockAgent, MockBehavior};

    /// Registry backed by primed cache entries only; the lazy pool is never
    /// touched while the cache is warm.
    fn primed_registry(chain: &[&str]) -> Arc<ConfigRegistry> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy("postgres://localhost/unused")
            .expect("lazy pool");
        let registry = Arc::new(ConfigRegistry::with_ttl(
            pool,
            std::time::Duration::from_secs(3600),
        ));

        let mut ai = AiSettings::default();
        ai.fallback_chain = chain.iter().map(|s| s.to_string()).collect();
        ai.model_rates.insert(
            "mock-model".to_string(),
            ModelRate {
                input_per_1k: 0.001,
                output_per_1k: 0.002,
            },
        );
        registry.prime(&ai);
        registry.prime(&CostBudget::default());
        registry.prime(&SchedulerSettings::default());
        registry
    }

    fn today_utc() -> chrono::NaiveDate {
        Utc::now().date_naive()
    }

    #[tokio::test]
    async fn auth_failure_falls_through_and_disables_provider_for_scope() {
        let alpha = Arc::new(MockAgent::new("alpha", MockBehavior::AuthError));
        let beta = Arc::new(MockAgent::new("beta", MockBehavior::succeed("answer")));
        let ledger = Arc::new(MemoryCostLedger::new());
        let manager = AgentManager::new(primed_registry(&["alpha", "beta"]), ledger.clone())
            .with_provider(alpha.clone())
            .with_provider(beta.clone());

        let response = manager.invoke("worker/analysis", "prompt").await.unwrap();
        assert_eq!(response.text, "answer");

        // Exactly one ledger entry, against the provider that answered
        assert_eq!(ledger.total_for("alpha", today_utc()).await.unwrap(), 0.0);
        assert!(ledger.total_for("beta", today_utc()).await.unwrap() > 0.0);

        // Alpha is out for this scope for the process lifetime
        assert!(manager.is_disabled("worker/analysis", "alpha"));
        assert!(!manager.is_disabled("worker/extraction", "alpha"));

        manager.invoke("worker/analysis", "prompt").await.unwrap();
        assert_eq!(alpha.call_count(), 1, "disabled provider is not retried");
        assert_eq!(beta.call_count(), 2);
    }

    #[tokio::test]
    async fn transient_failure_moves_on_without_disabling() {
        let alpha = Arc::new(MockAgent::new("alpha", MockBehavior::TransientError));
        let beta = Arc::new(MockAgent::new("beta", MockBehavior::succeed("answer")));
        let manager = AgentManager::new(
            primed_registry(&["alpha", "beta"]),
            Arc::new(MemoryCostLedger::new()),
        )
        .with_provider(alpha.clone())
        .with_provider(beta);

        manager.invoke("worker/analysis", "prompt").await.unwrap();
        assert!(!manager.is_disabled("worker/analysis", "alpha"));

        // Next call tries alpha again
        manager.invoke("worker/analysis", "prompt").await.unwrap();
        assert_eq!(alpha.call_count(), 2);
    }

    #[tokio::test]
    async fn exhausted_chain_reports_no_provider() {
        let manager = AgentManager::new(
            primed_registry(&["alpha"]),
            Arc::new(MemoryCostLedger::new()),
        )
        .with_provider(Arc::new(MockAgent::new("alpha", MockBehavior::TransientError)));

        let err = manager.invoke("worker/analysis", "prompt").await.unwrap_err();
        assert!(matches!(err, ProcessError::NoProviderAvailable));
    }

    #[tokio::test]
    async fn provider_over_budget_is_skipped() {
        let ledger = Arc::new(MemoryCostLedger::new());
        // Default budget is 5 USD/day; spend past it
        ledger
            .record(CostEntry {
                date: today_utc(),
                provider: "alpha".to_string(),
                model: "mock-model".to_string(),
                tokens_in: 0,
                tokens_out: 0,
                cost_usd: 6.0,
            })
            .await
            .unwrap();

        let alpha = Arc::new(MockAgent::new("alpha", MockBehavior::succeed("never")));
        let manager = AgentManager::new(primed_registry(&["alpha"]), ledger)
            .with_provider(alpha.clone());

        let err = manager.invoke("worker/analysis", "prompt").await.unwrap_err();
        assert!(matches!(
            err,
            ProcessError::BudgetExhausted { ref provider } if provider == "alpha"
        ));
        assert_eq!(alpha.call_count(), 0, "no call once the budget is gone");
    }

    #[tokio::test]
    async fn over_budget_provider_falls_through_to_next() {
        let ledger = Arc::new(MemoryCostLedger::new());
        ledger
            .record(CostEntry {
                date: today_utc(),
                provider: "alpha".to_string(),
                model: "mock-model".to_string(),
                tokens_in: 0,
                tokens_out: 0,
                cost_usd: 6.0,
            })
            .await
            .unwrap();

        let manager = AgentManager::new(primed_registry(&["alpha", "beta"]), ledger)
            .with_provider(Arc::new(MockAgent::new("alpha", MockBehavior::succeed("a"))))
            .with_provider(Arc::new(MockAgent::new("beta", MockBehavior::succeed("b"))));

        let response = manager.invoke("worker/analysis", "prompt").await.unwrap();
        assert_eq!(response.text, "b");
    }

    #[tokio::test]
    async fn cost_is_priced_from_model_rates() {
        let ledger = Arc::new(MemoryCostLedger::new());
        let manager = AgentManager::new(primed_registry(&["alpha"]), ledger.clone())
            .with_provider(Arc::new(MockAgent::new("alpha", MockBehavior::succeed("ok"))));

        manager.invoke("worker/analysis", "prompt").await.unwrap();

        // Mock usage: 1000 in, 500 out at 0.001/0.002 per 1K
        let total = ledger.total_for("alpha", today_utc()).await.unwrap();
        assert!((total - 0.002).abs() < 1e-9, "got {total}");
    }

    #[tokio::test]
    async fn disabled_scope_gets_no_provider() {
        let registry = primed_registry(&["alpha"]);
        let mut ai = AiSettings::default();
        ai.fallback_chain = vec!["alpha".to_string()];
        ai.per_scope_enabled.insert("worker/analysis".to_string(), false);
        registry.prime(&ai);

        let alpha = Arc::new(MockAgent::new("alpha", MockBehavior::succeed("ok")));
        let manager = AgentManager::new(registry, Arc::new(MemoryCostLedger::new()))
            .with_provider(alpha.clone());

        let err = manager.invoke("worker/analysis", "prompt").await.unwrap_err();
        assert!(matches!(err, ProcessError::NoProviderAvailable));
        assert_eq!(alpha.call_count(), 0);
    }
}
