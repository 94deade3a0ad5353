//! Chat-completions HTTP backend
//!
//! Talks to any OpenAI-compatible `/chat/completions` endpoint. Throttled
//! requests (HTTP 429) are retried with exponential backoff; every other
//! non-success status is surfaced as [`LlmError::Http`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::CompletionBackend;
use crate::error::{LlmError, LlmResult};
use crate::prompt::StructuredPrompt;
use crate::render::render;

/// HTTP backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpBackendConfig {
    /// Base URL; `/chat/completions` is appended
    pub endpoint: String,
    /// Model identifier sent with each request
    pub model: String,
    /// Bearer token (optional for local servers)
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    /// Retries after HTTP 429 before giving up
    pub max_throttle_retries: u32,
    /// First backoff delay; doubled on each retry
    pub backoff_base_ms: u64,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        HttpBackendConfig {
            endpoint: std::env::var("FOAMFLOW_LLM_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:11434/v1".to_string()),
            model: std::env::var("FOAMFLOW_LLM_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
            api_key: std::env::var("FOAMFLOW_LLM_API_KEY").ok(),
            temperature: 0.0,
            request_timeout_secs: 300,
            max_throttle_retries: 5,
            backoff_base_ms: 500,
        }
    }
}

impl HttpBackendConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn new(endpoint: &str, model: &str) -> Self {
        HttpBackendConfig {
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            api_key: None,
            ..Self::default()
        }
    }

    /// Set authentication token
    pub fn with_api_key(mut self, key: &str) -> Self {
        self.api_key = Some(key.to_string());
        self
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.trim_end_matches('/'))
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(10);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Completion backend over HTTP
pub struct HttpCompletionBackend {
    config: HttpBackendConfig,
    http_client: reqwest::Client,
}

impl HttpCompletionBackend {
    pub fn new(config: HttpBackendConfig) -> LlmResult<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(LlmError::Config("endpoint must not be empty".into()));
        }
        if config.model.trim().is_empty() {
            return Err(LlmError::Config("model must not be empty".into()));
        }
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("foamflow-llm/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        info!(endpoint = %config.endpoint, model = %config.model, "HTTP completion backend ready");
        Ok(HttpCompletionBackend {
            config,
            http_client,
        })
    }

    /// Create backend from environment variables
    pub fn from_env() -> LlmResult<Self> {
        Self::new(HttpBackendConfig::from_env())
    }

    pub fn config(&self) -> &HttpBackendConfig {
        &self.config
    }
}

#[async_trait]
impl CompletionBackend for HttpCompletionBackend {
    async fn complete(&self, prompt: &StructuredPrompt) -> LlmResult<String> {
        let rendered = render(prompt);
        let body = ChatRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &rendered.system,
                },
                ChatMessage {
                    role: "user",
                    content: &rendered.user,
                },
            ],
        };
        let url = self.config.completions_url();

        let mut attempt = 0u32;
        loop {
            let mut request = self.http_client.post(&url).json(&body);
            if let Some(key) = &self.config.api_key {
                request = request.bearer_auth(key);
            }
            debug!(url = %url, kind = ?prompt.kind(), attempt, "sending completion request");
            let response = request.send().await?;
            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if attempt >= self.config.max_throttle_retries {
                    return Err(LlmError::Throttled {
                        attempts: attempt + 1,
                    });
                }
                let delay = self.config.backoff(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, "completion throttled, backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(LlmError::Http {
                    status: status.as_u16(),
                    body: text,
                });
            }

            let parsed: ChatResponse = response.json().await?;
            return parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| LlmError::InvalidEnvelope("no choices in response".into()));
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completions_url_trims_trailing_slash() {
        let config = HttpBackendConfig::new("http://llm.local/v1/", "m");
        assert_eq!(
            config.completions_url(),
            "http://llm.local/v1/chat/completions"
        );
    }

    #[test]
    fn test_backoff_doubles() {
        let mut config = HttpBackendConfig::new("http://llm.local", "m");
        config.backoff_base_ms = 100;
        assert_eq!(config.backoff(0), Duration::from_millis(100));
        assert_eq!(config.backoff(3), Duration::from_millis(800));
    }

    #[test]
    fn test_empty_model_rejected() {
        let config = HttpBackendConfig::new("http://llm.local", " ");
        assert!(matches!(
            HttpCompletionBackend::new(config),
            Err(LlmError::Config(_))
        ));
    }

    #[test]
    fn test_api_key_not_serialized() {
        let config = HttpBackendConfig::new("http://llm.local", "m").with_api_key("secret");
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }
}
