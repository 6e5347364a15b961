//! Model provider abstraction layer
//!
//! Defines the contract every AI provider adapter implements, the error
//! taxonomy the router recovers from, and the token estimate used when a
//! provider does not report usage. The router (`router.rs`) works against
//! `ModelProvider` trait objects so new backends slot in without touching
//! dispatch logic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod anthropic;
pub mod openai;
pub mod router;

pub use router::{ModelResult, ModelRouter, ProviderInfo};

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors that can occur during a provider call
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("timeout")]
    Timeout,

    #[error("parse error: {0}")]
    ParseError(String),
}

/// Raw output of one provider call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelOutput {
    /// Generated text
    pub text: String,

    /// Provider-reported total token usage, when available
    pub tokens: Option<i64>,
}

/// Contract implemented by every provider adapter
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name, e.g. "openai", "anthropic", "ollama"
    fn name(&self) -> &str;

    /// Model identifier sent to the backend
    fn model(&self) -> &str;

    /// Whether the provider's credentials/endpoint are configured
    fn available(&self) -> bool;

    /// Estimated cost per 1K tokens in USD; local providers return 0.0
    fn cost_per_1k(&self) -> f64;

    /// Execute one generation call
    async fn generate(&self, prompt: &str) -> Result<ModelOutput>;
}

/// Fixed heuristic for token accounting when the provider reports no
/// usage: roughly four characters per token.
pub fn estimate_tokens(text: &str) -> i64 {
    (text.chars().count() as i64 + 3) / 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(400)), 100);
    }
}
