// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Business logic (prompts, scoring, filtering) lives in domain layers.

use async_trait::async_trait;
use thiserror::Error;

// =============================================================================
// Agent provider trait (generic LLM capability)
// =============================================================================

/// Token usage reported by a provider for one completion.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatUsage {
    pub tokens_in: i64,
    pub tokens_out: i64,
}

/// One completed chat turn.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub text: String,
    pub model: String,
    pub usage: ChatUsage,
}

/// Provider-level failures, classified for the fallback chain.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Bad or revoked credentials. The provider is disabled for the calling
    /// scope for the rest of the process lifetime.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Hard quota / account limit from the provider. Treated like `Auth`.
    #[error("quota exceeded: {0}")]
    Quota(String),
    /// Timeouts, 5xx, connection errors. The chain moves on.
    #[error("transient provider failure: {0}")]
    Transient(String),
    /// The provider answered but the response was unusable.
    #[error("invalid provider response: {0}")]
    Invalid(String),
}

/// A single LLM provider.
#[async_trait]
pub trait BaseAgent: Send + Sync {
    /// Stable provider key used in config, ledger rows and disable flags
    /// (e.g. "openai").
    fn name(&self) -> &str;

    /// Complete a prompt. `model` overrides the provider's default.
    async fn complete(
        &self,
        prompt: &str,
        model: Option<&str>,
    ) -> Result<ChatResponse, ProviderError>;
}
