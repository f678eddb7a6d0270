//! Chat-completions client shared by the LLM extraction backend and the
//! LLM finding verifier.
//!
//! Speaks the OpenAI-compatible `/chat/completions` protocol; local servers
//! (vLLM, llama.cpp, Ollama) expose the same shape.

use crate::backend::BackendError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAI,
    Local,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: Provider,
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
}

impl LlmConfig {
    pub fn openai(api_key: &str, model: &str) -> Self {
        Self {
            provider: Provider::OpenAI,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            timeout_secs: 60,
            temperature: 0.0,
        }
    }

    pub fn local(url: &str, model: &str) -> Self {
        Self {
            provider: Provider::Local,
            api_key: String::new(),
            model: model.to_string(),
            base_url: Some(url.to_string()),
            timeout_secs: 120,
            temperature: 0.0,
        }
    }

    /// `OPENAI_API_KEY` first, then `LOCAL_LLM_URL`.
    pub fn from_env() -> Result<Self, LlmError> {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
            let mut config = Self::openai(&key, &model);
            config.base_url = std::env::var("OPENAI_BASE_URL").ok();
            return Ok(config);
        }
        if let Ok(url) = std::env::var("LOCAL_LLM_URL") {
            let model = std::env::var("LOCAL_LLM_MODEL").unwrap_or_else(|_| "default".to_string());
            return Ok(Self::local(&url, &model));
        }
        Err(LlmError::Config(
            "no LLM provider configured; set OPENAI_API_KEY or LOCAL_LLM_URL".to_string(),
        ))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn endpoint(&self) -> String {
        let base = self.base_url.as_deref().unwrap_or(match self.provider {
            Provider::OpenAI => "https://api.openai.com/v1",
            Provider::Local => "http://localhost:8000/v1",
        });
        format!("{}/chat/completions", base.trim_end_matches('/'))
    }

    pub fn validate(&self) -> Result<(), LlmError> {
        if self.model.trim().is_empty() {
            return Err(LlmError::Config("model must not be empty".to_string()));
        }
        if self.provider == Provider::OpenAI && self.api_key.is_empty() {
            return Err(LlmError::Config("OpenAI provider requires an API key".to_string()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(LlmError::Config(format!("temperature {} outside 0..=2", self.temperature)));
        }
        url::Url::parse(&self.endpoint()).map_err(|e| LlmError::Config(format!("invalid base_url: {e}")))?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("invalid LLM configuration: {0}")]
    Config(String),
}

impl From<LlmError> for BackendError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Api { status, message } => BackendError::Api { status, message },
            LlmError::RateLimited { retry_after_ms } => BackendError::RateLimited { retry_after_ms },
            LlmError::InvalidResponse(m) => BackendError::Malformed(m),
            LlmError::Network(m) => BackendError::Transport(m),
            LlmError::Unauthorized(m) | LlmError::Config(m) => BackendError::Unauthorized(m),
        }
    }
}

// ============================================================================
// Client
// ============================================================================

pub struct ChatClient {
    client: Client,
    config: LlmConfig,
}

impl ChatClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        config.validate()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Run one JSON-mode completion and parse the message content.
    pub async fn complete_json(&self, system: &str, user: &str) -> Result<serde_json::Value, LlmError> {
        let body = serde_json::json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let mut request = self.client.post(self.config.endpoint()).json(&body);
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }
        let response = request.send().await.map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let header = response.headers().get("retry-after").and_then(|v| v.to_str().ok());
            return Err(LlmError::RateLimited {
                retry_after_ms: retry_after_ms(header),
            });
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(LlmError::Unauthorized(format!("provider answered {status}")));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: message.chars().take(200).collect(),
            });
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::InvalidResponse("missing choices[0].message.content".to_string()))?;
        parse_json_content(content)
    }
}

/// Parse a message body as JSON, tolerating a surrounding code fence.
pub fn parse_json_content(content: &str) -> Result<serde_json::Value, LlmError> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim()).map_err(|e| LlmError::InvalidResponse(format!("content is not JSON: {e}")))
}

/// `Retry-After` in whole seconds, as milliseconds; one second when absent
/// or not a number.
fn retry_after_ms(header: Option<&str>) -> u64 {
    header
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(1)
        .saturating_mul(1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_defaults_and_overrides() {
        assert_eq!(LlmConfig::openai("k", "m").endpoint(), "https://api.openai.com/v1/chat/completions");
        assert_eq!(
            LlmConfig::local("http://127.0.0.1:9000/v1/", "m").endpoint(),
            "http://127.0.0.1:9000/v1/chat/completions"
        );
    }

    #[test]
    fn validation() {
        assert!(LlmConfig::openai("k", "m").validate().is_ok());
        assert!(LlmConfig::openai("", "m").validate().is_err());
        assert!(LlmConfig::local("not a url", "m").validate().is_err());
        assert!(LlmConfig::openai("k", "m").with_temperature(3.0).validate().is_err());
    }

    #[test]
    fn retry_after_header_parsing() {
        assert_eq!(retry_after_ms(Some(" 30 ")), 30_000);
        assert_eq!(retry_after_ms(None), 1_000);
        assert_eq!(retry_after_ms(Some("Wed, 21 Oct 2015 07:28:00 GMT")), 1_000);
        assert_eq!(retry_after_ms(Some(&u64::MAX.to_string())), u64::MAX);
    }

    #[test]
    fn fenced_json_is_accepted() {
        let v = parse_json_content("```json\n{\"operations\": []}\n```").unwrap();
        assert!(v["operations"].as_array().unwrap().is_empty());
        assert!(parse_json_content("sure! here it is").is_err());
    }

    #[test]
    fn errors_map_to_backend_errors() {
        let e: BackendError = LlmError::Unauthorized("x".into()).into();
        assert!(!e.is_retryable());
        let e: BackendError = LlmError::InvalidResponse("x".into()).into();
        assert!(e.is_retryable());
    }
}
