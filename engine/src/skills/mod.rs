//! Skill manager
//!
//! A skill is a named, pluggable capability invoked with structured
//! inputs and producing structured output. The manager owns the registry,
//! resolves lookup hints, dispatches invocations, and tracks per-skill
//! invoke/error counters. Skills declaring `needs_model` receive the
//! routed model output merged into their inputs by the orchestrator.

use crate::error::{EngineError, Result};
use crate::memory::MemoryStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Listing entry for one registered skill
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillManifest {
    pub name: String,
    pub version: String,
    pub description: String,
    pub enabled: bool,
    pub needs_model: bool,
    pub invoke_count: u64,
    pub error_count: u64,
}

/// Contract implemented by every capability
#[async_trait]
pub trait Skill: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "1.0"
    }

    fn description(&self) -> &str;

    /// Whether the orchestrator should route a model call before invoking
    fn needs_model(&self) -> bool;

    async fn invoke(&self, inputs: &serde_json::Value) -> Result<serde_json::Value>;
}

/// Registry and dispatcher for skills
pub struct SkillManager {
    skills: Vec<Arc<dyn Skill>>,
    counters: Mutex<HashMap<String, (u64, u64)>>,
}

impl SkillManager {
    /// Empty registry; callers register skills at startup.
    pub fn new() -> Self {
        Self {
            skills: Vec::new(),
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Registry preloaded with the built-in skills.
    pub fn with_builtins(memory: Arc<MemoryStore>) -> Self {
        let mut manager = Self::new();
        manager.register(Arc::new(SummarizeSkill));
        manager.register(Arc::new(EchoSkill));
        manager.register(Arc::new(RecallSkill { memory }));
        manager
    }

    pub fn register(&mut self, skill: Arc<dyn Skill>) {
        tracing::info!(skill = skill.name(), "skill registered");
        self.skills.push(skill);
    }

    /// Look up a skill by exact name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Skill>> {
        self.skills
            .iter()
            .find(|s| s.name() == name)
            .map(Arc::clone)
    }

    /// Resolve a lookup hint to a registered skill.
    pub fn resolve(&self, hint: &str) -> Result<Arc<dyn Skill>> {
        self.get(hint)
            .ok_or_else(|| EngineError::SkillNotFound(hint.to_string()))
    }

    /// Invoke a skill by name, tracking counters.
    pub async fn invoke(&self, name: &str, inputs: &serde_json::Value) -> Result<serde_json::Value> {
        let skill = self.resolve(name)?;

        let result = skill.invoke(inputs).await;

        if let Ok(mut counters) = self.counters.lock() {
            let entry = counters.entry(name.to_string()).or_insert((0, 0));
            entry.0 += 1;
            if result.is_err() {
                entry.1 += 1;
            }
        }

        result.map_err(|e| match e {
            EngineError::SkillFailed { .. } => e,
            other => EngineError::SkillFailed {
                name: name.to_string(),
                message: other.to_string(),
            },
        })
    }

    /// Manifest listing for all registered skills.
    pub fn list_skills(&self) -> Vec<SkillManifest> {
        let counters = self.counters.lock().ok();
        self.skills
            .iter()
            .map(|s| {
                let (invoked, errored) = counters
                    .as_ref()
                    .and_then(|c| c.get(s.name()).copied())
                    .unwrap_or((0, 0));
                SkillManifest {
                    name: s.name().to_string(),
                    version: s.version().to_string(),
                    description: s.description().to_string(),
                    enabled: true,
                    needs_model: s.needs_model(),
                    invoke_count: invoked,
                    error_count: errored,
                }
            })
            .collect()
    }
}

impl Default for SkillManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Model-backed summarization: passes the routed model output through,
/// falling back to naive truncation when no model output is present.
pub struct SummarizeSkill;

#[async_trait]
impl Skill for SummarizeSkill {
    fn name(&self) -> &str {
        "summarize"
    }

    fn description(&self) -> &str {
        "Condense the command subject into a short summary"
    }

    fn needs_model(&self) -> bool {
        true
    }

    async fn invoke(&self, inputs: &serde_json::Value) -> Result<serde_json::Value> {
        if let Some(model_output) = inputs.get("model_output").and_then(|v| v.as_str()) {
            return Ok(serde_json::json!({ "summary": model_output }));
        }

        let command = inputs
            .get("command")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let summary: String = command.chars().take(200).collect();
        Ok(serde_json::json!({ "summary": summary, "truncated": true }))
    }
}

/// Mechanical pass-through, useful for wiring checks and cron smoke jobs.
pub struct EchoSkill;

#[async_trait]
impl Skill for EchoSkill {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the inputs unchanged"
    }

    fn needs_model(&self) -> bool {
        false
    }

    async fn invoke(&self, inputs: &serde_json::Value) -> Result<serde_json::Value> {
        Ok(serde_json::json!({ "echo": inputs }))
    }
}

/// Mechanical memory lookup over the store.
pub struct RecallSkill {
    pub memory: Arc<MemoryStore>,
}

#[async_trait]
impl Skill for RecallSkill {
    fn name(&self) -> &str {
        "recall"
    }

    fn description(&self) -> &str {
        "Search long-term memory for matching entries"
    }

    fn needs_model(&self) -> bool {
        false
    }

    async fn invoke(&self, inputs: &serde_json::Value) -> Result<serde_json::Value> {
        let query = inputs
            .get("query")
            .or_else(|| inputs.get("command"))
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let top_k = inputs.get("top_k").and_then(|v| v.as_i64()).unwrap_or(5);

        let hits = self.memory.query(query, top_k).await?;
        Ok(serde_json::json!({ "hits": hits }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn manager() -> (Database, SkillManager) {
        let db = Database::in_memory().await.unwrap();
        let memory = Arc::new(MemoryStore::new(db.pool().clone()));
        let manager = SkillManager::with_builtins(memory);
        (db, manager)
    }

    #[tokio::test]
    async fn test_builtin_registry() {
        let (_db, m) = manager().await;
        let names: Vec<String> = m.list_skills().into_iter().map(|s| s.name).collect();
        assert!(names.contains(&"summarize".to_string()));
        assert!(names.contains(&"echo".to_string()));
        assert!(names.contains(&"recall".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_skill_not_found() {
        let (_db, m) = manager().await;
        let err = m.invoke("no_such_skill", &serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, EngineError::SkillNotFound(_)));
    }

    #[tokio::test]
    async fn test_echo_roundtrip() {
        let (_db, m) = manager().await;
        let out = m
            .invoke("echo", &serde_json::json!({"k": "v"}))
            .await
            .unwrap();
        assert_eq!(out["echo"]["k"], "v");
    }

    #[tokio::test]
    async fn test_summarize_uses_model_output() {
        let (_db, m) = manager().await;
        let out = m
            .invoke(
                "summarize",
                &serde_json::json!({"command": "long text", "model_output": "short"}),
            )
            .await
            .unwrap();
        assert_eq!(out["summary"], "short");

        let out = m
            .invoke("summarize", &serde_json::json!({"command": "no model here"}))
            .await
            .unwrap();
        assert_eq!(out["summary"], "no model here");
        assert_eq!(out["truncated"], true);
    }

    #[tokio::test]
    async fn test_invoke_counters() {
        let (_db, m) = manager().await;
        m.invoke("echo", &serde_json::json!({})).await.unwrap();
        m.invoke("echo", &serde_json::json!({})).await.unwrap();

        let manifest = m
            .list_skills()
            .into_iter()
            .find(|s| s.name == "echo")
            .unwrap();
        assert_eq!(manifest.invoke_count, 2);
        assert_eq!(manifest.error_count, 0);
    }
}
