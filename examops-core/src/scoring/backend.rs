use crate::config::ScorerConfig;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use super::ScoringError;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoringRequest {
    pub system_prompt: String,
    pub user_prompt: String,
}

/// Raw completion service behind the advisory scorer
#[async_trait]
pub trait ScoringBackend: Send + Sync {
    /// Returns the model's response text
    async fn complete(&self, request: &ScoringRequest) -> Result<String, ScoringError>;
}

/// Used when no endpoint is configured
pub struct DisabledBackend;

#[async_trait]
impl ScoringBackend for DisabledBackend {
    async fn complete(&self, _request: &ScoringRequest) -> Result<String, ScoringError> {
        Err(ScoringError::Disabled)
    }
}

/// Chat-completions client. The blocking HTTP call runs on tokio's blocking pool.
#[derive(Debug, Clone)]
pub struct HttpScoringBackend {
    endpoint: String,
    deployment: String,
    api_key: String,
    temperature: f32,
    timeout: Duration,
}

impl HttpScoringBackend {
    pub fn new(
        endpoint: impl Into<String>,
        deployment: impl Into<String>,
        api_key: impl Into<String>,
        temperature: f32,
        timeout: Duration,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            deployment: deployment.into(),
            api_key: api_key.into(),
            temperature,
            timeout,
        }
    }

    /// Returns `Ok(None)` when the config has no endpoint
    pub fn from_config(config: &ScorerConfig) -> Result<Option<Self>, ScoringError> {
        let Some(endpoint) = config.endpoint.as_deref() else {
            return Ok(None);
        };
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| ScoringError::MissingApiKey(config.api_key_env.clone()))?;

        Ok(Some(Self::new(
            endpoint,
            config.deployment.clone(),
            api_key,
            config.temperature,
            Duration::from_secs(config.timeout_secs),
        )))
    }

    fn body(&self, request: &ScoringRequest) -> Value {
        json!({
            "model": self.deployment,
            "temperature": self.temperature,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_prompt },
            ],
        })
    }

    fn post(&self, body: Value) -> Result<String, ScoringError> {
        let response = ureq::post(&self.endpoint)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .set("api-key", &self.api_key)
            .timeout(self.timeout)
            .send_json(body)
            .map_err(|e| ScoringError::Http(e.to_string()))?;

        let payload: Value = response
            .into_json()
            .map_err(|e| ScoringError::InvalidResponse(e.to_string()))?;
        message_content(&payload)
    }
}

#[async_trait]
impl ScoringBackend for HttpScoringBackend {
    async fn complete(&self, request: &ScoringRequest) -> Result<String, ScoringError> {
        let client = self.clone();
        let body = self.body(request);
        tokio::task::spawn_blocking(move || client.post(body))
            .await
            .map_err(|e| ScoringError::Join(e.to_string()))?
    }
}

/// `choices[0].message.content` of a chat-completions response
fn message_content(payload: &Value) -> Result<String, ScoringError> {
    payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(|content| content.trim().to_string())
        .ok_or_else(|| ScoringError::InvalidResponse("missing choices[0].message.content".to_string()))
}
