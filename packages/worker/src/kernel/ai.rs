//! OpenAI-compatible chat provider using direct HTTP calls.
//!
//! Works against any endpoint speaking the `/chat/completions` shape, which
//! covers the hosted providers the fallback chain is configured with.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::traits::{BaseAgent, ChatResponse, ChatUsage, ProviderError};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiClient {
    client: Client,
    name: String,
    base_url: String,
    api_key: String,
    default_model: String,
}

// Request/Response types for the chat completions API

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    model: Option<String>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<i64>,
    completion_tokens: Option<i64>,
}

impl OpenAiClient {
    pub fn new(api_key: String, default_model: String) -> Result<Self, ProviderError> {
        Self::with_base_url("openai", DEFAULT_BASE_URL.to_string(), api_key, default_model)
    }

    /// Point the client at any OpenAI-compatible endpoint under a provider
    /// key of the caller's choosing.
    pub fn with_base_url(
        name: &str,
        base_url: String,
        api_key: String,
        default_model: String,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ProviderError::Transient(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            name: name.to_string(),
            base_url,
            api_key,
            default_model,
        })
    }
}

#[async_trait]
impl BaseAgent for OpenAiClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        prompt: &str,
        model: Option<&str>,
    ) -> Result<ChatResponse, ProviderError> {
        let model = model.unwrap_or(&self.default_model);
        let request = ChatRequest {
            model,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    ProviderError::Transient(e.to_string())
                } else {
                    ProviderError::Transient(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => ProviderError::Auth(format!("{status}: {body}")),
                402 | 429 => ProviderError::Quota(format!("{status}: {body}")),
                s if s >= 500 => ProviderError::Transient(format!("{status}: {body}")),
                _ => ProviderError::Invalid(format!("{status}: {body}")),
            });
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Invalid(format!("malformed completion body: {e}")))?;

        let text = completion
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| ProviderError::Invalid("completion had no content".to_string()))?;

        let usage = completion.usage.map(|u| ChatUsage {
            tokens_in: u.prompt_tokens.unwrap_or(0),
            tokens_out: u.completion_tokens.unwrap_or(0),
        });

        Ok(ChatResponse {
            text,
            model: completion.model.unwrap_or_else(|| model.to_string()),
            usage: usage.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires API key
    async fn test_complete() {
        let api_key = std::env::var("OPENAI_API_KEY")
            .expect("OPENAI_API_KEY must be set for integration tests");

        let client = OpenAiClient::new(api_key, "gpt-4o-mini".to_string()).unwrap();

        let response = client
            .complete("Say 'Hello, World!' and nothing else.", None)
            .await
            .expect("AI completion should succeed");

        assert!(response.text.contains("Hello"));
    }
}
