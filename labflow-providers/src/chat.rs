//! ABOUTME: OpenAI-compatible chat completions client with JSON response mode
//! ABOUTME: Only the first choice's message content is consulted

use async_trait::async_trait;
use labflow_core::error::{LabFlowError, Result};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Configuration for a chat completions endpoint.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Base URL, e.g. `https://openrouter.ai/api/v1`.
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
    pub temperature: f32,
}

impl ChatConfig {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            timeout: Duration::from_secs(120),
            temperature: 0.1,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A model call that must produce a JSON object.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Send a system prompt plus one user message and return the raw content
    /// of the first choice. The request sets JSON-object response mode; the
    /// content is still treated as untrusted by callers.
    async fn complete_json(&self, system: &str, user: &str) -> Result<String>;
}

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    config: ChatConfig,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl OpenAiCompatClient {
    pub fn new(config: ChatConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LabFlowError::Configuration {
                message: format!("failed to build http client: {e}"),
            })?;
        Ok(Self { http, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.endpoint.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompatClient {
    async fn complete_json(&self, system: &str, user: &str) -> Result<String> {
        let body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "response_format": {"type": "json_object"},
            "temperature": self.config.temperature,
        });

        let response = self
            .http
            .post(self.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LabFlowError::LlmUnavailable {
                message: format!("chat request failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LabFlowError::LlmUnavailable {
                message: format!(
                    "chat endpoint returned {status}: {}",
                    detail.chars().take(200).collect::<String>()
                ),
                source: None,
            });
        }

        let parsed: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| LabFlowError::LlmUnavailable {
                    message: format!("malformed chat response: {e}"),
                    source: Some(Box::new(e)),
                })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| LabFlowError::LlmUnavailable {
                message: "chat response contained no choices".to_string(),
                source: None,
            })?;

        debug!(
            model = %self.config.model,
            content_len = content.len(),
            "chat completion received"
        );
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completions_url_joins_cleanly() {
        let client = OpenAiCompatClient::new(ChatConfig::new(
            "https://openrouter.ai/api/v1/",
            "key",
            "deepseek/deepseek-chat",
        ))
        .unwrap();
        assert_eq!(
            client.completions_url(),
            "https://openrouter.ai/api/v1/chat/completions"
        );
    }

    #[test]
    fn response_shape_parses() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"{\"markers\":[]}"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content, "{\"markers\":[]}");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_llm_unavailable() {
        let mut config = ChatConfig::new("http://127.0.0.1:1", "key", "model");
        config.timeout = Duration::from_millis(300);
        let client = OpenAiCompatClient::new(config).unwrap();

        let err = client.complete_json("system", "user").await.unwrap_err();
        assert_eq!(err.kind(), "llm_unavailable");
    }
}
