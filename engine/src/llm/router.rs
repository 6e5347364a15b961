//! Model router
//!
//! Selects which provider serves a call. Candidates are ranked by the
//! configured routing-rule table (keyed by task type and budget) and the
//! default priority order, with a budget-driven cost bias. Dispatch walks
//! the ranking with a per-attempt timeout, recovering locally from
//! provider failures and surfacing `NoProviderAvailable` only when every
//! candidate is exhausted.

use super::{estimate_tokens, ModelProvider};
use crate::config::{LlmConfig, RoutingRule};
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Successful dispatch result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResult {
    pub output: String,
    pub provider: String,
    pub model: String,
    pub tokens_used: i64,
}

/// Provider listing entry for the status surfaces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub provider: String,
    pub model: String,
    pub available: bool,
}

/// Model router over a fixed set of configured providers
pub struct ModelRouter {
    providers: Vec<Box<dyn ModelProvider>>,
    routing: Vec<RoutingRule>,
    priority: Vec<String>,
    attempt_timeout: Duration,
}

impl ModelRouter {
    pub fn new(providers: Vec<Box<dyn ModelProvider>>, config: &LlmConfig) -> Self {
        Self {
            providers,
            routing: config.routing.clone(),
            priority: config.priority.clone(),
            attempt_timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// All configured providers with their availability flag.
    pub fn list_providers(&self) -> Vec<ProviderInfo> {
        self.providers
            .iter()
            .map(|p| ProviderInfo {
                provider: p.name().to_string(),
                model: p.model().to_string(),
                available: p.available(),
            })
            .collect()
    }

    /// Only the providers that can currently be reached.
    pub fn available_providers(&self) -> Vec<ProviderInfo> {
        self.list_providers()
            .into_iter()
            .filter(|p| p.available)
            .collect()
    }

    /// Rank available providers for a call.
    ///
    /// A matching routing rule dominates; remaining providers follow the
    /// default priority order. The budget hint biases toward cheaper
    /// providers without excluding any candidate.
    pub fn rank(&self, task_type: &str, budget: &str) -> Vec<&dyn ModelProvider> {
        let rule = self.routing.iter().find(|r| {
            (r.task_type.is_empty() || r.task_type == task_type)
                && (r.budget.is_empty() || r.budget == budget)
        });

        let cost_weight = match budget {
            "low" => 30.0,
            "medium" => 10.0,
            _ => 0.0,
        };

        let mut candidates: Vec<(&dyn ModelProvider, f64)> = self
            .providers
            .iter()
            .filter(|p| p.available())
            .map(|p| {
                let mut score = 0.0_f64;

                if let Some(rule) = rule {
                    if let Some(pos) = rule.providers.iter().position(|n| n == p.name()) {
                        score += 200.0 - pos as f64 * 10.0;
                    }
                }

                if let Some(pos) = self.priority.iter().position(|n| n == p.name()) {
                    score += 100.0 - pos as f64 * 10.0;
                }

                score -= p.cost_per_1k() * cost_weight;

                (p.as_ref(), score)
            })
            .collect();

        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        candidates.into_iter().map(|(p, _)| p).collect()
    }

    /// Dispatch a prompt, attempting providers in ranked order.
    ///
    /// A timeout or failure on one provider only abandons that attempt;
    /// the next candidate is tried. All candidates exhausted raises
    /// `NoProviderAvailable` carrying the attempt count.
    pub async fn dispatch(
        &self,
        prompt: &str,
        task_type: &str,
        budget: &str,
    ) -> std::result::Result<ModelResult, EngineError> {
        let ranked = self.rank(task_type, budget);

        if ranked.is_empty() {
            tracing::warn!("no providers configured or available");
            return Err(EngineError::NoProviderAvailable { attempts: 0 });
        }

        let mut attempts = 0;
        for provider in ranked {
            attempts += 1;
            tracing::debug!(
                provider = provider.name(),
                timeout_secs = self.attempt_timeout.as_secs(),
                "attempting provider"
            );

            let result =
                tokio::time::timeout(self.attempt_timeout, provider.generate(prompt)).await;

            match result {
                Ok(Ok(output)) => {
                    let tokens_used = output
                        .tokens
                        .unwrap_or_else(|| estimate_tokens(&output.text));
                    tracing::info!(provider = provider.name(), tokens_used, "provider succeeded");
                    return Ok(ModelResult {
                        output: output.text,
                        provider: provider.name().to_string(),
                        model: provider.model().to_string(),
                        tokens_used,
                    });
                }
                Ok(Err(e)) => {
                    tracing::warn!(provider = provider.name(), error = %e, "provider failed");
                }
                Err(_) => {
                    tracing::warn!(provider = provider.name(), "provider timed out");
                }
            }
        }

        tracing::error!(attempts, "all providers exhausted");
        Err(EngineError::NoProviderAvailable { attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ModelError, ModelOutput};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct MockProvider {
        name: String,
        available: bool,
        cost: f64,
        fail: bool,
        tokens: Option<i64>,
        calls: Arc<AtomicUsize>,
    }

    impl MockProvider {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                available: true,
                cost: 0.002,
                fail: false,
                tokens: Some(7),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn failing(name: &str) -> Self {
            Self {
                fail: true,
                ..Self::new(name)
            }
        }
    }

    #[async_trait]
    impl ModelProvider for MockProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn model(&self) -> &str {
            "mock-model"
        }

        fn available(&self) -> bool {
            self.available
        }

        fn cost_per_1k(&self) -> f64 {
            self.cost
        }

        async fn generate(&self, prompt: &str) -> crate::llm::Result<ModelOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ModelError::Unavailable("mock down".into()));
            }
            Ok(ModelOutput {
                text: format!("echo: {prompt}"),
                tokens: self.tokens,
            })
        }
    }

    fn config_with(priority: &[&str]) -> LlmConfig {
        LlmConfig {
            priority: priority.iter().map(|s| s.to_string()).collect(),
            timeout_secs: 5,
            ..Default::default()
        }
    }

    #[test]
    fn test_rank_follows_default_priority() {
        let providers: Vec<Box<dyn ModelProvider>> = vec![
            Box::new(MockProvider::new("openai")),
            Box::new(MockProvider::new("anthropic")),
        ];
        let router = ModelRouter::new(providers, &config_with(&["anthropic", "openai"]));

        let ranked = router.rank("general", "medium");
        assert_eq!(ranked[0].name(), "anthropic");
        assert_eq!(ranked[1].name(), "openai");
    }

    #[test]
    fn test_routing_rule_dominates_priority() {
        let providers: Vec<Box<dyn ModelProvider>> = vec![
            Box::new(MockProvider::new("openai")),
            Box::new(MockProvider::new("anthropic")),
        ];
        let mut config = config_with(&["anthropic", "openai"]);
        config.routing.push(RoutingRule {
            task_type: "code".into(),
            budget: String::new(),
            providers: vec!["openai".into()],
        });
        let router = ModelRouter::new(providers, &config);

        let ranked = router.rank("code", "medium");
        assert_eq!(ranked[0].name(), "openai");

        // other task types fall back to the default order
        let ranked = router.rank("general", "medium");
        assert_eq!(ranked[0].name(), "anthropic");
    }

    #[test]
    fn test_low_budget_biases_toward_cheap_provider() {
        let mut cheap = MockProvider::new("cheap");
        cheap.cost = 0.0;
        let mut pricey = MockProvider::new("pricey");
        pricey.cost = 0.5;

        let providers: Vec<Box<dyn ModelProvider>> = vec![Box::new(pricey), Box::new(cheap)];
        // priority puts pricey first, but only 10 points ahead
        let router = ModelRouter::new(providers, &config_with(&["pricey", "cheap"]));

        let ranked = router.rank("general", "low");
        assert_eq!(ranked[0].name(), "cheap");

        // at high budget the priority order wins
        let ranked = router.rank("general", "high");
        assert_eq!(ranked[0].name(), "pricey");
    }

    #[test]
    fn test_unavailable_providers_filtered() {
        let mut down = MockProvider::new("down");
        down.available = false;

        let providers: Vec<Box<dyn ModelProvider>> =
            vec![Box::new(down), Box::new(MockProvider::new("up"))];
        let router = ModelRouter::new(providers, &config_with(&["down", "up"]));

        assert_eq!(router.list_providers().len(), 2);
        assert_eq!(router.available_providers().len(), 1);
        let ranked = router.rank("general", "medium");
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].name(), "up");
    }

    #[tokio::test]
    async fn test_dispatch_returns_first_success() {
        let ok = MockProvider::new("primary");
        let calls = Arc::clone(&ok.calls);
        let backup = MockProvider::new("backup");
        let backup_calls = Arc::clone(&backup.calls);

        let providers: Vec<Box<dyn ModelProvider>> = vec![Box::new(ok), Box::new(backup)];
        let router = ModelRouter::new(providers, &config_with(&["primary", "backup"]));

        let result = router.dispatch("hello", "general", "medium").await.unwrap();
        assert_eq!(result.provider, "primary");
        assert_eq!(result.tokens_used, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(backup_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dispatch_falls_back_in_order() {
        let providers: Vec<Box<dyn ModelProvider>> = vec![
            Box::new(MockProvider::failing("primary")),
            Box::new(MockProvider::new("backup")),
        ];
        let router = ModelRouter::new(providers, &config_with(&["primary", "backup"]));

        let result = router.dispatch("hello", "general", "medium").await.unwrap();
        assert_eq!(result.provider, "backup");
    }

    #[tokio::test]
    async fn test_dispatch_exhaustion_counts_attempts() {
        let a = MockProvider::failing("a");
        let b = MockProvider::failing("b");
        let c = MockProvider::failing("c");
        let counts = [
            Arc::clone(&a.calls),
            Arc::clone(&b.calls),
            Arc::clone(&c.calls),
        ];

        let providers: Vec<Box<dyn ModelProvider>> =
            vec![Box::new(a), Box::new(b), Box::new(c)];
        let router = ModelRouter::new(providers, &config_with(&["a", "b", "c"]));

        let err = router.dispatch("hello", "general", "medium").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::NoProviderAvailable { attempts: 3 }
        ));
        for count in counts {
            assert_eq!(count.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_dispatch_estimates_tokens_when_unreported() {
        let mut p = MockProvider::new("p");
        p.tokens = None;

        let providers: Vec<Box<dyn ModelProvider>> = vec![Box::new(p)];
        let router = ModelRouter::new(providers, &config_with(&["p"]));

        let result = router.dispatch("hi", "general", "medium").await.unwrap();
        // "echo: hi" is 8 chars -> 2 estimated tokens
        assert_eq!(result.tokens_used, 2);
    }

    #[tokio::test]
    async fn test_dispatch_with_no_providers() {
        let router = ModelRouter::new(vec![], &config_with(&[]));
        let err = router.dispatch("hello", "general", "medium").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::NoProviderAvailable { attempts: 0 }
        ));
    }
}
