//! Anthropic provider adapter
//!
//! Speaks the messages API: `x-api-key` header auth plus a pinned
//! `anthropic-version`, text blocks in the response, and separate
//! input/output token counts in `usage`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ModelError, ModelOutput, ModelProvider, Result};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

/// Anthropic messages-API provider
pub struct AnthropicProvider {
    base_url: String,
    model: String,
    api_key: Option<String>,
    cost_per_1k: f64,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        cost_per_1k: f64,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key,
            cost_per_1k,
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn available(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    fn cost_per_1k(&self) -> f64 {
        self.cost_per_1k
    }

    async fn generate(&self, prompt: &str) -> Result<ModelOutput> {
        let key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ModelError::AuthenticationFailed("no API key configured".into()))?;

        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            messages: vec![RequestMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout
                } else if e.is_connect() {
                    ModelError::Unavailable(format!("cannot connect to {}", self.base_url))
                } else {
                    ModelError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ModelError::RateLimited);
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ModelError::AuthenticationFailed(format!(
                "anthropic rejected credentials ({status})"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Unavailable(format!(
                "anthropic API error ({status}): {body}"
            )));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ModelError::ParseError(format!("bad messages body: {e}")))?;

        let text = parsed
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");

        let tokens = parsed
            .usage
            .map(|u| u.input_tokens + u.output_tokens);

        Ok(ModelOutput { text, tokens })
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<RequestMessage>,
}

#[derive(Debug, Serialize)]
struct RequestMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: i64,
    output_tokens: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_availability_requires_nonempty_key() {
        assert!(!AnthropicProvider::new("https://x", "m", None, 0.004).available());
        assert!(!AnthropicProvider::new("https://x", "m", Some(String::new()), 0.004).available());
        assert!(AnthropicProvider::new("https://x", "m", Some("key".into()), 0.004).available());
    }
}
