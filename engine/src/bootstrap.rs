//! Service construction
//!
//! Builds every engine service exactly once from the loaded config and
//! hands them out as explicit Arc handles. There is no global mutable
//! state: whoever needs a service receives its handle, and shutdown is
//! an explicit call on the owner.

use crate::config::Config;
use crate::cron::CronSystem;
use crate::db::Database;
use crate::goals::GoalTracker;
use crate::governor::Governor;
use crate::lifecycle::LifecycleManager;
use crate::llm::{anthropic::AnthropicProvider, openai::OpenAiProvider, ModelProvider, ModelRouter};
use crate::memory::MemoryStore;
use crate::orchestrator::Orchestrator;
use crate::skills::SkillManager;
use anyhow::Result;
use std::sync::Arc;

/// The constructed service graph
pub struct Services {
    pub db: Database,
    pub lifecycle: Arc<LifecycleManager>,
    pub governor: Arc<Governor>,
    pub router: Arc<ModelRouter>,
    pub skills: Arc<SkillManager>,
    pub memory: Arc<MemoryStore>,
    pub goals: Arc<GoalTracker>,
    pub orchestrator: Arc<Orchestrator>,
    pub cron: Arc<CronSystem>,
}

/// Construct the full service graph from config.
pub async fn build_services(config: &Config) -> Result<Services> {
    let db = Database::new(&config.db_path()).await?;
    let pool = db.pool().clone();

    let lifecycle = Arc::new(LifecycleManager::new(pool.clone()));
    let governor = Arc::new(Governor::new(config.governor.clone(), pool.clone()));
    let memory = Arc::new(MemoryStore::new(pool.clone()));
    let goals = Arc::new(GoalTracker::new(pool.clone()));
    let skills = Arc::new(SkillManager::with_builtins(Arc::clone(&memory)));

    let router = Arc::new(ModelRouter::new(build_providers(config), &config.llm));

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&lifecycle),
        Arc::clone(&governor),
        Arc::clone(&router),
        Arc::clone(&skills),
        Arc::clone(&memory),
        Arc::clone(&goals),
    ));

    let cron = Arc::new(CronSystem::new(
        pool,
        Arc::clone(&orchestrator),
        config.cron.tick_seconds,
    ));

    Ok(Services {
        db,
        lifecycle,
        governor,
        router,
        skills,
        memory,
        goals,
        orchestrator,
        cron,
    })
}

/// Instantiate one adapter per configured provider section. A provider
/// whose key env var is unset stays listed but unavailable; Ollama is
/// available whenever enabled.
fn build_providers(config: &Config) -> Vec<Box<dyn ModelProvider>> {
    let mut providers: Vec<Box<dyn ModelProvider>> = Vec::new();

    let anthropic_key = read_key(&config.llm.anthropic.api_key_env);
    providers.push(Box::new(AnthropicProvider::new(
        config.llm.anthropic.base_url.clone(),
        config.llm.anthropic.model.clone(),
        anthropic_key,
        config.llm.anthropic.cost_per_1k,
    )));

    let openai_key = read_key(&config.llm.openai.api_key_env);
    providers.push(Box::new(OpenAiProvider::new(
        "openai",
        config.llm.openai.base_url.clone(),
        config.llm.openai.model.clone(),
        openai_key,
        config.llm.openai.cost_per_1k,
    )));

    if config.llm.ollama.enabled {
        providers.push(Box::new(OpenAiProvider::new(
            "ollama",
            format!("{}/v1", config.llm.ollama.base_url.trim_end_matches('/')),
            config.llm.ollama.model.clone(),
            Some(String::new()),
            0.0,
        )));
    }

    providers
}

fn read_key(env_var: &str) -> Option<String> {
    std::env::var(env_var).ok().filter(|k| !k.is_empty())
}
