//! Orchestrator
//!
//! Drives one governed execution cycle per inbound command:
//! Observe -> Orient -> Decide -> Act -> Learn. Each stage advances the
//! task state machine, so the durable record always tells how far a cycle
//! got. The orchestrator is the only caller of the lifecycle manager, the
//! governor, and the model router; skills, memory, and goals are invoked
//! through their own service handles.
//!
//! A cycle never retries on its own. Re-submission is safe: every call
//! creates a fresh task.

use crate::error::{EngineError, Result};
use crate::governor::Governor;
use crate::lifecycle::{LifecycleManager, TaskFields, TaskStatus};
use crate::llm::ModelRouter;
use crate::memory::{MemoryHit, MemoryStore};
use crate::skills::SkillManager;
use crate::goals::GoalTracker;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// How many memory hits Observe folds into the working context
const MEMORY_TOP_K: i64 = 5;

/// Inbound command for one cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRequest {
    pub command: String,

    /// Caller identity, e.g. "user", "cron", "api"
    #[serde(default = "default_source")]
    pub source: String,

    #[serde(default)]
    pub session_id: Option<i64>,

    #[serde(default)]
    pub goal_id: Option<i64>,

    /// Free-form working context, passed through opaquely
    #[serde(default = "default_context")]
    pub context: serde_json::Value,

    #[serde(default)]
    pub skill_hint: Option<String>,

    #[serde(default = "default_task_type")]
    pub task_type: String,

    /// Coarse cost/latency hint: low | medium | high
    #[serde(default = "default_budget")]
    pub budget: String,

    /// Explicit soft-block override requested by the caller
    #[serde(default)]
    pub governor_override: bool,

    /// Skip governor gating entirely. Only the cron trigger source sets
    /// this, and only for jobs pre-declared with governor_required=false.
    #[serde(skip)]
    pub skip_governor: bool,
}

fn default_source() -> String {
    "user".to_string()
}

fn default_context() -> serde_json::Value {
    serde_json::json!({})
}

fn default_task_type() -> String {
    "general".to_string()
}

fn default_budget() -> String {
    "medium".to_string()
}

impl CycleRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            source: default_source(),
            session_id: None,
            goal_id: None,
            context: default_context(),
            skill_hint: None,
            task_type: default_task_type(),
            budget: default_budget(),
            governor_override: false,
            skip_governor: false,
        }
    }
}

/// Fully-populated outcome of one cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleResult {
    pub success: bool,
    pub task_id: Option<i64>,
    pub skill_used: Option<String>,
    pub model_used: Option<String>,
    pub output: serde_json::Value,
    pub tokens_used: i64,
    pub elapsed_s: f64,
    pub governor_approved: bool,
    pub error: Option<String>,
    pub memory_hits: Vec<MemoryHit>,
}

/// The execution core: coordinates lifecycle, governor, router, skills,
/// memory, and goals for one cycle at a time. Cheap to share; every
/// handle is an Arc and `run` takes `&self`, so concurrent cycles need no
/// global serialization.
pub struct Orchestrator {
    lifecycle: Arc<LifecycleManager>,
    governor: Arc<Governor>,
    router: Arc<ModelRouter>,
    skills: Arc<SkillManager>,
    memory: Arc<MemoryStore>,
    goals: Arc<GoalTracker>,
}

impl Orchestrator {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        governor: Arc<Governor>,
        router: Arc<ModelRouter>,
        skills: Arc<SkillManager>,
        memory: Arc<MemoryStore>,
        goals: Arc<GoalTracker>,
    ) -> Self {
        Self {
            lifecycle,
            governor,
            router,
            skills,
            memory,
            goals,
        }
    }

    /// Run one full cycle.
    ///
    /// Unresolved lookups (unknown session/goal id, unknown skill hint)
    /// surface as request-level errors; any task already created is
    /// marked failed first, so no cycle leaves a non-terminal record
    /// behind. Everything else (governor blocks, provider exhaustion,
    /// skill failures) comes back as a fully-populated `CycleResult`.
    pub async fn run(&self, req: CycleRequest) -> Result<CycleResult> {
        let start = Instant::now();
        let cycle_id = uuid::Uuid::new_v4();
        info!(%cycle_id, command = %req.command, source = %req.source, "cycle started");

        // Resolve referenced entities before any record is written.
        if let Some(session_id) = req.session_id {
            self.lifecycle
                .sessions
                .get(session_id)
                .await?
                .ok_or(EngineError::NotFound {
                    kind: "session",
                    id: session_id.to_string(),
                })?;
        }
        if let Some(goal_id) = req.goal_id {
            self.goals.get(goal_id).await?.ok_or(EngineError::NotFound {
                kind: "goal",
                id: goal_id.to_string(),
            })?;
        }

        // ── Observe ──────────────────────────────────────────────────
        let input_data = serde_json::json!({
            "command": req.command,
            "source": req.source,
            "context": req.context,
        });
        let task = self
            .lifecycle
            .tasks
            .create(req.session_id, &req.command, &req.task_type, &input_data.to_string())
            .await?;
        let task_id = task.id;

        let memory_hits = match self.memory.query(&req.command, MEMORY_TOP_K).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(task_id, error = %e, "memory lookup failed, continuing without hits");
                Vec::new()
            }
        };

        let mut working_context = req.context.clone();
        if !memory_hits.is_empty() {
            if let Some(obj) = working_context.as_object_mut() {
                let recalled: Vec<&str> = memory_hits.iter().map(|h| h.content.as_str()).collect();
                obj.insert("recalled".to_string(), serde_json::json!(recalled));
            }
        }

        let mut result = CycleResult {
            success: false,
            task_id: Some(task_id),
            skill_used: None,
            model_used: None,
            output: serde_json::json!({}),
            tokens_used: 0,
            elapsed_s: 0.0,
            governor_approved: false,
            error: None,
            memory_hits,
        };

        // ── Orient ───────────────────────────────────────────────────
        let skill = match &req.skill_hint {
            Some(hint) => match self.skills.resolve(hint) {
                Ok(skill) => skill,
                Err(e) => {
                    // Unresolved hint is a request-level error, but the
                    // task must still reach a terminal state.
                    self.fail_task(task_id, &e.to_string()).await;
                    return Err(e);
                }
            },
            None => self.infer_skill(&req.command, &req.task_type),
        };
        let skill_name = skill.name().to_string();

        self.lifecycle
            .tasks
            .advance(
                task_id,
                TaskStatus::Assigned,
                TaskFields {
                    skill_name: Some(skill_name.clone()),
                    ..Default::default()
                },
            )
            .await?;
        result.skill_used = Some(skill_name.clone());

        // ── Decide ───────────────────────────────────────────────────
        if req.skip_governor {
            info!(task_id, "governor gating skipped for pre-declared job");
            result.governor_approved = true;
        } else {
            let action = format!("invoke skill '{}' for command: {}", skill_name, req.command);
            let decision = self.governor.evaluate(&action, &working_context).await?;

            if decision.blocks_execution(req.governor_override) {
                let reason = format!(
                    "governor blocked (score {}): {}",
                    decision.risk_score, decision.reason
                );
                warn!(task_id, %reason, "cycle blocked");
                self.fail_task(task_id, &reason).await;
                result.error = Some(reason);
                result.elapsed_s = start.elapsed().as_secs_f64();
                return Ok(result);
            }
            result.governor_approved = true;
        }

        // ── Act ──────────────────────────────────────────────────────
        self.lifecycle
            .tasks
            .advance(
                task_id,
                TaskStatus::Executing,
                TaskFields {
                    governor_ok: Some(result.governor_approved),
                    ..Default::default()
                },
            )
            .await?;

        let mut inputs = serde_json::json!({
            "command": req.command,
            "context": working_context,
        });

        if skill.needs_model() {
            let prompt = build_prompt(&req.command, &result.memory_hits);
            match self.router.dispatch(&prompt, &req.task_type, &req.budget).await {
                Ok(model_result) => {
                    result.model_used = Some(model_result.provider.clone());
                    result.tokens_used = model_result.tokens_used;
                    if let Some(obj) = inputs.as_object_mut() {
                        obj.insert(
                            "model_output".to_string(),
                            serde_json::json!(model_result.output),
                        );
                    }
                }
                Err(e) => {
                    error!(task_id, error = %e, "model dispatch failed");
                    self.fail_task(task_id, &e.to_string()).await;
                    result.error = Some(e.to_string());
                    result.elapsed_s = start.elapsed().as_secs_f64();
                    return Ok(result);
                }
            }
        }

        let output = match self.skills.invoke(&skill_name, &inputs).await {
            Ok(output) => output,
            Err(e) => {
                error!(task_id, error = %e, "skill invocation failed");
                self.fail_task(task_id, &e.to_string()).await;
                result.error = Some(e.to_string());
                result.elapsed_s = start.elapsed().as_secs_f64();
                return Ok(result);
            }
        };
        result.output = output.clone();

        self.lifecycle
            .tasks
            .advance(task_id, TaskStatus::Verifying, TaskFields::default())
            .await?;

        // ── Learn ────────────────────────────────────────────────────
        let lesson = format!("command: {} -> {}", req.command, output);
        let tags = vec![req.task_type.clone(), skill_name.clone()];
        if let Err(e) = self
            .memory
            .add(&lesson, "cycle", &tags, 0.5, &serde_json::json!({"task_id": task_id}))
            .await
        {
            // Persistence failure is fatal to the cycle.
            error!(task_id, error = %e, "failed to record cycle outcome");
            self.fail_task(task_id, &e.to_string()).await;
            result.error = Some(e.to_string());
            result.elapsed_s = start.elapsed().as_secs_f64();
            return Ok(result);
        }

        if let Some(goal_id) = req.goal_id {
            if let Some(delta) = output.get("progress_delta").and_then(|v| v.as_f64()) {
                match self
                    .goals
                    .update_progress(goal_id, delta, Some(&req.command))
                    .await
                {
                    Ok(progress) => info!(task_id, goal_id, progress, "goal progress updated"),
                    Err(e) => warn!(task_id, goal_id, error = %e, "goal progress not applied"),
                }
            }
            if let Some(session_id) = req.session_id {
                if let Err(e) = self.lifecycle.sessions.link_goal(session_id, goal_id).await {
                    warn!(session_id, goal_id, error = %e, "goal link not recorded");
                }
            }
        }

        self.lifecycle
            .tasks
            .close(
                task_id,
                &output.to_string(),
                result.tokens_used,
                result.model_used.as_deref(),
            )
            .await?;

        result.success = true;
        result.elapsed_s = start.elapsed().as_secs_f64();
        info!(
            task_id,
            skill = %skill_name,
            tokens = result.tokens_used,
            elapsed_s = result.elapsed_s,
            "cycle closed"
        );
        Ok(result)
    }

    /// Pick a skill when no hint was given: a registered skill named in
    /// the command wins, mechanical task types fall back to `echo`, and
    /// everything else gets the model-backed `summarize`.
    fn infer_skill(&self, command: &str, task_type: &str) -> Arc<dyn crate::skills::Skill> {
        for word in command.split_whitespace() {
            let word = word.to_lowercase();
            if let Some(skill) = self.skills.get(&word) {
                return skill;
            }
        }

        let fallback = if task_type == "mechanical" { "echo" } else { "summarize" };
        // Built-ins are registered at startup; a missing fallback means a
        // broken registry and there is nothing sensible to degrade to.
        self.skills
            .get(fallback)
            .or_else(|| self.skills.get("echo"))
            .expect("skill registry has no fallback skill")
    }

    /// Best-effort terminal failure; a task already terminal stays as-is.
    async fn fail_task(&self, task_id: i64, message: &str) {
        if let Err(e) = self.lifecycle.tasks.fail(task_id, message).await {
            if !matches!(e, EngineError::TaskClosed(_)) {
                error!(task_id, error = %e, "could not mark task failed");
            }
        }
    }
}

fn build_prompt(command: &str, hits: &[MemoryHit]) -> String {
    if hits.is_empty() {
        return command.to_string();
    }
    let recalled = hits
        .iter()
        .map(|h| format!("- {}", h.content))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{command}\n\nRelevant memory:\n{recalled}")
}
