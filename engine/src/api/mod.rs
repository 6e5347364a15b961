//! REST API surface
//!
//! Thin boundary over the service handles: request shaping, auth header
//! check, and status-code mapping. No business rule lives here: blocked
//! cycles are a 200 with `success=false`, unresolved lookups map to 404,
//! conflicts to 409, and unexpected faults to 500.

use crate::cron::CronSystem;
use crate::error::EngineError;
use crate::goals::GoalTracker;
use crate::lifecycle::LifecycleManager;
use crate::llm::ModelRouter;
use crate::memory::MemoryStore;
use crate::orchestrator::{CycleRequest, Orchestrator};
use crate::skills::SkillManager;
use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Shared handles for all route handlers.
///
/// Every service is constructed once at startup and injected here; the
/// API layer holds no state of its own beyond the configured key.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub lifecycle: Arc<LifecycleManager>,
    pub router: Arc<ModelRouter>,
    pub skills: Arc<SkillManager>,
    pub memory: Arc<MemoryStore>,
    pub goals: Arc<GoalTracker>,
    pub cron: Arc<CronSystem>,
    pub api_key: Option<String>,
}

/// Error wrapper translating `EngineError` into HTTP responses.
struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_not_found() {
            StatusCode::NOT_FOUND
        } else if self.0.is_conflict() {
            StatusCode::CONFLICT
        } else if matches!(self.0, EngineError::Config(_)) {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

/// Build the full `/v1` router with optional key auth.
pub fn build_router(state: AppState) -> Router {
    let auth_state = state.clone();

    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/models", get(list_models))
        .route("/v1/agent/run", post(agent_run))
        .route("/v1/agent/tasks", get(list_tasks))
        .route("/v1/agent/tasks/:id", get(get_task))
        .route("/v1/skills", get(list_skills))
        .route("/v1/skills/invoke", post(invoke_skill))
        .route("/v1/goals", get(list_goals).post(create_goal))
        .route("/v1/goals/:id", patch(update_goal).delete(delete_goal))
        .route("/v1/sessions", get(list_sessions).post(create_session))
        .route("/v1/sessions/:id", delete(end_session))
        .route("/v1/memory/search", get(search_memory))
        .route("/v1/memory/recent", get(recent_memory))
        .route("/v1/memory", post(add_memory))
        .route("/v1/cron", get(list_cron).post(add_cron))
        .route("/v1/cron/:name/trigger", post(trigger_cron))
        .route("/v1/cron/:name", delete(remove_cron))
        .layer(middleware::from_fn_with_state(auth_state, require_api_key))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

/// Serve the router until shutdown is signalled.
pub async fn serve(state: AppState, bind: &str) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("API listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("API shutting down gracefully");
        })
        .await?;
    Ok(())
}

/// Key check for every route except health. Accepts `x-api-key` or a
/// bearer token; an empty configured key disables auth entirely.
async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.api_key.as_deref().filter(|k| !k.is_empty()) else {
        return next.run(request).await;
    };
    if request.uri().path() == "/v1/health" {
        return next.run(request).await;
    }

    let headers = request.headers();
    let presented = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        });

    if presented != Some(expected) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": "Unauthorized" })),
        )
            .into_response();
    }
    next.run(request).await
}

// ── System ───────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "system": "archon",
        "version": env!("CARGO_PKG_VERSION"),
        "providers": state.router.list_providers(),
        "skills": state.skills.list_skills().iter().map(|s| s.name.clone()).collect::<Vec<_>>(),
    }))
}

async fn list_models(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "providers": state.router.list_providers(),
        "available": state.router.available_providers(),
    }))
}

// ── Agent ────────────────────────────────────────────────────────────

async fn agent_run(
    State(state): State<AppState>,
    Json(req): Json<CycleRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let result = state.orchestrator.run(req).await?;
    Ok(Json(serde_json::to_value(result).unwrap_or_default()))
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    20
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tasks = state.lifecycle.tasks.list_recent(query.limit).await?;
    Ok(Json(json!({ "tasks": tasks })))
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let task = state
        .lifecycle
        .tasks
        .get(id)
        .await?
        .ok_or(EngineError::NotFound {
            kind: "task",
            id: id.to_string(),
        })?;
    Ok(Json(serde_json::to_value(task).unwrap_or_default()))
}

// ── Skills ───────────────────────────────────────────────────────────

async fn list_skills(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "skills": state.skills.list_skills() }))
}

#[derive(Debug, Deserialize)]
struct SkillInvokeReq {
    name: String,
    #[serde(default)]
    inputs: serde_json::Value,
}

async fn invoke_skill(
    State(state): State<AppState>,
    Json(req): Json<SkillInvokeReq>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let output = state.skills.invoke(&req.name, &req.inputs).await?;
    Ok(Json(output))
}

// ── Goals ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GoalListQuery {
    status: Option<String>,
}

async fn list_goals(
    State(state): State<AppState>,
    Query(query): Query<GoalListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let goals = if query.status.as_deref() == Some("active") {
        state.goals.list_active().await?
    } else {
        state.goals.list_all().await?
    };
    Ok(Json(json!({ "goals": goals })))
}

#[derive(Debug, Deserialize)]
struct GoalCreateReq {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_priority")]
    priority: i64,
    #[serde(default = "default_object")]
    context: serde_json::Value,
}

fn default_priority() -> i64 {
    5
}

fn default_object() -> serde_json::Value {
    json!({})
}

async fn create_goal(
    State(state): State<AppState>,
    Json(req): Json<GoalCreateReq>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let goal_id = state
        .goals
        .create(&req.title, &req.description, req.priority, &req.context)
        .await?;
    Ok(Json(json!({ "goal_id": goal_id })))
}

#[derive(Debug, Deserialize)]
struct GoalUpdateReq {
    progress: Option<f64>,
    notes: Option<String>,
    status: Option<String>,
}

async fn update_goal(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<GoalUpdateReq>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Some(delta) = req.progress {
        state
            .goals
            .update_progress(id, delta, req.notes.as_deref())
            .await?;
    }
    match req.status.as_deref() {
        Some("paused") => state.goals.pause(id).await?,
        Some("active") => state.goals.resume(id).await?,
        Some("completed") => state.goals.complete(id).await?,
        Some("abandoned") => state.goals.abandon(id).await?,
        Some(other) => {
            return Err(EngineError::Config(format!("unknown goal status '{other}'")).into())
        }
        None => {}
    }

    let goal = state.goals.get(id).await?.ok_or(EngineError::NotFound {
        kind: "goal",
        id: id.to_string(),
    })?;
    Ok(Json(serde_json::to_value(goal).unwrap_or_default()))
}

async fn delete_goal(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.goals.abandon(id).await?;
    Ok(Json(json!({ "status": "abandoned", "goal_id": id })))
}

// ── Sessions ─────────────────────────────────────────────────────────

async fn list_sessions(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let sessions = state.lifecycle.sessions.list_active().await?;
    Ok(Json(json!({ "sessions": sessions })))
}

#[derive(Debug, Deserialize)]
struct SessionCreateReq {
    name: String,
    #[serde(default = "default_object")]
    context: serde_json::Value,
}

async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<SessionCreateReq>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session_id = state
        .lifecycle
        .sessions
        .create(&req.name, &req.context.to_string())
        .await?;
    Ok(Json(json!({ "session_id": session_id })))
}

async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.lifecycle.sessions.end(id).await?;
    Ok(Json(json!({ "status": "ended", "session_id": id })))
}

// ── Memory ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MemorySearchQuery {
    q: String,
    #[serde(default = "default_top_k")]
    top_k: i64,
    tag: Option<String>,
}

fn default_top_k() -> i64 {
    5
}

async fn search_memory(
    State(state): State<AppState>,
    Query(query): Query<MemorySearchQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let results = match query.tag.as_deref() {
        Some(tag) => state.memory.query_tagged(&query.q, tag, query.top_k).await?,
        None => state.memory.query(&query.q, query.top_k).await?,
    };
    Ok(Json(json!({ "results": results })))
}

#[derive(Debug, Deserialize)]
struct MemoryAddReq {
    content: String,
    #[serde(default = "default_memory_source")]
    source: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default = "default_importance")]
    importance: f64,
    #[serde(default = "default_object")]
    metadata: serde_json::Value,
}

fn default_memory_source() -> String {
    "user".to_string()
}

fn default_importance() -> f64 {
    0.5
}

async fn add_memory(
    State(state): State<AppState>,
    Json(req): Json<MemoryAddReq>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let memory_id = state
        .memory
        .add(&req.content, &req.source, &req.tags, req.importance, &req.metadata)
        .await?;
    Ok(Json(json!({ "memory_id": memory_id })))
}

async fn recent_memory(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let items = state.memory.get_recent(query.limit).await?;
    Ok(Json(json!({ "items": items })))
}

// ── Cron ─────────────────────────────────────────────────────────────

async fn list_cron(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let jobs = state.cron.list_jobs().await?;
    Ok(Json(json!({ "jobs": jobs })))
}

#[derive(Debug, Deserialize)]
struct CronAddReq {
    name: String,
    skill_name: String,
    cron_expr: Option<String>,
    interval_s: Option<i64>,
    #[serde(default = "default_object")]
    input_data: serde_json::Value,
    #[serde(default = "default_true")]
    governor_required: bool,
}

fn default_true() -> bool {
    true
}

async fn add_cron(
    State(state): State<AppState>,
    Json(req): Json<CronAddReq>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let job = match (req.cron_expr.as_deref(), req.interval_s) {
        (Some(expr), _) => {
            state
                .cron
                .add_cron(&req.name, expr, &req.skill_name, &req.input_data, req.governor_required)
                .await?
        }
        (None, Some(interval)) => {
            state
                .cron
                .add_interval(
                    &req.name,
                    interval,
                    &req.skill_name,
                    &req.input_data,
                    req.governor_required,
                )
                .await?
        }
        (None, None) => {
            return Err(EngineError::Config("cron_expr or interval_s required".into()).into())
        }
    };
    Ok(Json(serde_json::to_value(job).unwrap_or_default()))
}

async fn trigger_cron(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let result = state.cron.trigger_now(&name).await?;
    Ok(Json(serde_json::to_value(result).unwrap_or_default()))
}

async fn remove_cron(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.cron.remove(&name).await?;
    Ok(Json(json!({ "status": "removed", "name": name })))
}
