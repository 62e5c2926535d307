//! HTTP language-model client speaking the chat-completions wire shape.
//! Without an API key the client reports itself unavailable, which the
//! degradation controller turns into the keyword-only tier.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use bookline_agent::llm::{ModelClient, ModelError};
use bookline_core::config::ModelConfig;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct HttpModelClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
}

impl HttpModelClient {
    pub fn new(config: &ModelConfig) -> Result<Self, ModelError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| ModelError::Unavailable { detail: error.to_string() })?;
        Ok(Self {
            http,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let Some(api_key) = &self.api_key else {
            return Err(ModelError::Unavailable { detail: "no api key configured".to_string() });
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key.expose_secret())
            .json(&json!({
                "model": self.model,
                "messages": [{ "role": "user", "content": prompt }],
                "temperature": 0.2,
            }))
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    ModelError::Deadline
                } else {
                    ModelError::Unavailable { detail: error.to_string() }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ModelError::Unavailable {
                detail: format!("http {status}: {detail}"),
            });
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|error| ModelError::Unavailable { detail: error.to_string() })?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(ModelError::EmptyCompletion)
    }
}
