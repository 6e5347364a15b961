//! OpenAI-compatible provider adapter
//!
//! Speaks the chat-completions wire format, which also covers Groq,
//! Mistral, Ollama's /v1 endpoint, and self-hosted gateways. The same
//! adapter is instantiated once per configured endpoint with its own
//! name, base URL, and cost figure.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ModelError, ModelOutput, ModelProvider, Result};

/// OpenAI-compatible chat provider
pub struct OpenAiProvider {
    name: String,
    base_url: String,
    model: String,
    api_key: Option<String>,
    cost_per_1k: f64,
    client: Client,
}

impl OpenAiProvider {
    /// Create a provider for one chat-completions endpoint.
    ///
    /// `api_key` of `None` marks the provider as unconfigured unless the
    /// endpoint needs no key (local Ollama): pass `Some("")` there.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        cost_per_1k: f64,
    ) -> Self {
        Self {
            name: name.into(),
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
impl ModelProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn available(&self) -> bool {
        self.api_key.is_some()
    }

    fn cost_per_1k(&self) -> f64 {
        self.cost_per_1k
    }

    async fn generate(&self, prompt: &str) -> Result<ModelOutput> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut call = self.client.post(&url).json(&request);
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.is_empty()) {
            call = call.bearer_auth(key);
        }

        let response = call.send().await.map_err(|e| {
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
                "{} rejected credentials ({})",
                self.name, status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Unavailable(format!(
                "{} API error ({}): {}",
                self.name, status, body
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::ParseError(format!("bad chat completion body: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::ParseError("response contained no choices".into()))?;

        Ok(ModelOutput {
            text: choice.message.content,
            tokens: parsed.usage.map(|u| u.total_tokens),
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_availability_tracks_key() {
        let unconfigured = OpenAiProvider::new("openai", "https://x", "m", None, 0.002);
        assert!(!unconfigured.available());

        let keyed =
            OpenAiProvider::new("openai", "https://x", "m", Some("sk-test".into()), 0.002);
        assert!(keyed.available());

        // local endpoints need no key but are still available
        let local = OpenAiProvider::new("ollama", "http://localhost:11434/v1", "m", Some(String::new()), 0.0);
        assert!(local.available());
    }
}
