// Fluent LLM request builder with automatic retry on parse failures
//
// Usage:
// ```rust,ignore
// let verdict: MatchVerdict = agents
//     .request("worker/analysis")
//     .system("You score job listings against a candidate profile")
//     .user(&format!("Listing:\n{}", listing_markdown))
//     .output::<MatchVerdict>()
//     .await?;
// ```

use std::fmt::Write;

use serde::de::DeserializeOwned;
use tracing::{info, warn};

use super::manager::AgentManager;
use crate::kernel::error::ProcessError;

/// Builder for LLM requests with automatic JSON parsing and retry
pub struct LlmRequest<'a> {
    agents: &'a AgentManager,
    scope: &'a str,
    system_prompt: Option<String>,
    user_message: Option<String>,
    max_retries: u32,
    /// Optional schema hint to include in retry prompts
    schema_hint: Option<String>,
}

impl<'a> LlmRequest<'a> {
    pub fn new(agents: &'a AgentManager, scope: &'a str) -> Self {
        Self {
            agents,
            scope,
            system_prompt: None,
            user_message: None,
            max_retries: 3,
            schema_hint: None,
        }
    }

    /// Set the system prompt (instructions for the AI)
    pub fn system(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Set the user message (the actual content/question)
    pub fn user(mut self, message: impl Into<String>) -> Self {
        self.user_message = Some(message.into());
        self
    }

    /// Set maximum parse attempts (default: 3)
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n.max(1);
        self
    }

    /// Provide a schema hint for retry error messages
    pub fn schema_hint(mut self, hint: impl Into<String>) -> Self {
        self.schema_hint = Some(hint.into());
        self
    }

    /// Execute the request and parse the response as JSON.
    ///
    /// Retries on parse failures, including the parse error in subsequent
    /// attempts so the model can fix its output. Provider-level failures
    /// (budget, no provider) propagate untouched.
    pub async fn output<T: DeserializeOwned>(self) -> Result<T, ProcessError> {
        let system = self.system_prompt.clone().unwrap_or_default();
        let user = self
            .user_message
            .clone()
            .ok_or_else(|| ProcessError::Internal(anyhow::anyhow!("user message is required")))?;

        let mut last_response = String::new();
        let mut last_error = String::new();

        for attempt in 1..=self.max_retries {
            let prompt = if attempt == 1 {
                self.build_initial_prompt(&system, &user)
            } else {
                self.build_retry_prompt(&last_response, &last_error)
            };

            let response = self.agents.invoke(self.scope, &prompt).await?;
            last_response = response.text.clone();

            match serde_json::from_str::<T>(strip_fences(&response.text)) {
                Ok(parsed) => {
                    info!(scope = self.scope, attempt, "parsed LLM response");
                    return Ok(parsed);
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        scope = self.scope,
                        attempt,
                        error = %e,
                        response_preview = %response.text.chars().take(200).collect::<String>(),
                        "failed to parse LLM response as JSON"
                    );
                }
            }
        }

        Err(ProcessError::Transient(format!(
            "no valid JSON after {} attempts: {}",
            self.max_retries, last_error
        )))
    }

    /// Execute the request and return raw text (no parsing)
    pub async fn text(self) -> Result<String, ProcessError> {
        let system = self.system_prompt.clone().unwrap_or_default();
        let user = self
            .user_message
            .clone()
            .ok_or_else(|| ProcessError::Internal(anyhow::anyhow!("user message is required")))?;

        let prompt = format!("{system}\n\n{user}");
        Ok(self.agents.invoke(self.scope, &prompt).await?.text)
    }

    fn build_initial_prompt(&self, system: &str, user: &str) -> String {
        let mut prompt = String::new();

        if !system.is_empty() {
            let _ = writeln!(prompt, "{}\n", system);
        }

        let _ = writeln!(prompt, "{}", user);

        let _ = writeln!(
            prompt,
            r#"

CRITICAL: Your response will be parsed directly by a JSON parser.

DO NOT include:
- Markdown code fences (```)
- Any text before the opening [ or {{
- Any text after the closing ] or }}
- Explanations or commentary

DO:
- Start your response with [ or {{ immediately
- Return syntactically valid JSON only"#
        );

        prompt
    }

    fn build_retry_prompt(&self, last_response: &str, error: &str) -> String {
        let response_preview: String = last_response.chars().take(500).collect();

        let mut prompt = format!(
            r#"JSON PARSE FAILED. Your previous response could not be parsed.

ERROR: {error}

Your response was:
{response_preview}

This failed because your response is not valid JSON.
"#
        );

        if let Some(hint) = &self.schema_hint {
            let _ = writeln!(prompt, "\nEXPECTED FORMAT:\n{}", hint);
        }

        let _ = writeln!(
            prompt,
            r#"
RESPOND WITH RAW JSON ONLY:
- First character must be [ or {{
- Last character must be ] or }}
- No ``` markdown fences
- No explanation text
- Use null for missing values, not undefined"#
        );

        prompt
    }
}

/// Models fence JSON despite instructions; tolerate it on parse.
fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open).trim()
}

/// Extension to start a fluent request from the manager.
pub trait LlmRequestExt {
    fn request<'a>(&'a self, scope: &'a str) -> LlmRequest<'a>;
}

impl LlmRequestExt for AgentManager {
    fn request<'a>(&'a self, scope: &'a str) -> LlmRequest<'a> {
        LlmRequest::new(self, scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_fences() {
        assert_eq!(strip_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_fences("```\n[1, 2]\n```"), "[1, 2]");
        assert_eq!(strip_fences("{\"a\": 1}"), "{\"a\": 1}");
    }
}
