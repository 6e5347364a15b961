//! Task store and state machine
//!
//! A task records one execution cycle. Status moves strictly forward
//! through `created -> assigned -> executing -> verifying -> closed`, with
//! `failed` reachable from any non-terminal state. Terminal tasks are
//! immutable; every transition commits as a single guarded UPDATE so
//! concurrent writers race safely and readers never observe a
//! half-applied change.

use crate::db::now_unix;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

/// Task status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Created,
    Assigned,
    Executing,
    Verifying,
    Closed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Created => "created",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Executing => "executing",
            TaskStatus::Verifying => "verifying",
            TaskStatus::Closed => "closed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(TaskStatus::Created),
            "assigned" => Some(TaskStatus::Assigned),
            "executing" => Some(TaskStatus::Executing),
            "verifying" => Some(TaskStatus::Verifying),
            "closed" => Some(TaskStatus::Closed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    /// Whether the status is terminal (`closed` or `failed`).
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Closed | TaskStatus::Failed)
    }

    /// Whether `next` is reachable from `self` in one step.
    ///
    /// Transitions are one-directional; `failed` short-circuits from any
    /// non-terminal state.
    pub fn can_advance_to(&self, next: TaskStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == TaskStatus::Failed {
            return true;
        }
        matches!(
            (self, next),
            (TaskStatus::Created, TaskStatus::Assigned)
                | (TaskStatus::Assigned, TaskStatus::Executing)
                | (TaskStatus::Executing, TaskStatus::Verifying)
                | (TaskStatus::Verifying, TaskStatus::Closed)
        )
    }
}

/// Optional fields written alongside a transition
#[derive(Debug, Clone, Default)]
pub struct TaskFields {
    pub skill_name: Option<String>,
    pub governor_ok: Option<bool>,
    pub model_used: Option<String>,
    pub tokens_used: Option<i64>,
}

/// Durable task record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: i64,
    pub session_id: Option<i64>,
    pub title: String,
    pub skill_name: Option<String>,
    pub task_type: String,
    pub status: TaskStatus,
    pub input_data: String,
    pub output_data: String,
    pub governor_ok: bool,
    pub model_used: Option<String>,
    pub tokens_used: i64,
    pub error_msg: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub closed_at: Option<i64>,
}

/// Task persistence operations
pub struct TaskStore {
    pool: SqlitePool,
}

impl TaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new task with status `created`.
    pub async fn create(
        &self,
        session_id: Option<i64>,
        title: &str,
        task_type: &str,
        input_data: &str,
    ) -> Result<TaskRecord> {
        let now = now_unix();
        let result = sqlx::query(
            "INSERT INTO tasks (session_id, title, task_type, input_data, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, 'created', ?, ?)",
        )
        .bind(session_id)
        .bind(title)
        .bind(task_type)
        .bind(input_data)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        tracing::debug!(task_id = id, title, "task created");

        self.get(id).await?.ok_or(EngineError::NotFound {
            kind: "task",
            id: id.to_string(),
        })
    }

    /// Get a task by id.
    pub async fn get(&self, id: i64) -> Result<Option<TaskRecord>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(row_to_task))
    }

    /// List most recent tasks.
    pub async fn list_recent(&self, limit: i64) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query("SELECT * FROM tasks ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(row_to_task).collect())
    }

    /// Advance a task to `next`, writing any accompanying fields.
    ///
    /// Fails with `InvalidTransition` when `next` is not reachable and
    /// `TaskClosed` when the task is already terminal. The UPDATE is
    /// guarded on the observed current status, so a concurrent transition
    /// causes a re-check instead of a lost update.
    pub async fn advance(&self, id: i64, next: TaskStatus, fields: TaskFields) -> Result<()> {
        let current = self.status_of(id).await?;

        if current.is_terminal() {
            return Err(EngineError::TaskClosed(id));
        }
        if !current.can_advance_to(next) {
            return Err(EngineError::InvalidTransition {
                from: current.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }

        let now = now_unix();
        let closed_at = next.is_terminal().then_some(now);

        let result = sqlx::query(
            "UPDATE tasks SET status = ?, \
             skill_name = COALESCE(?, skill_name), \
             governor_ok = COALESCE(?, governor_ok), \
             model_used = COALESCE(?, model_used), \
             tokens_used = COALESCE(?, tokens_used), \
             closed_at = COALESCE(?, closed_at), \
             updated_at = ? \
             WHERE id = ? AND status = ?",
        )
        .bind(next.as_str())
        .bind(fields.skill_name)
        .bind(fields.governor_ok)
        .bind(fields.model_used)
        .bind(fields.tokens_used)
        .bind(closed_at)
        .bind(now)
        .bind(id)
        .bind(current.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Lost the race; report against what the task became.
            let observed = self.status_of(id).await?;
            if observed.is_terminal() {
                return Err(EngineError::TaskClosed(id));
            }
            return Err(EngineError::InvalidTransition {
                from: observed.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }

        tracing::debug!(task_id = id, status = next.as_str(), "task advanced");
        Ok(())
    }

    /// Close a task, recording output, token usage, and the model used.
    pub async fn close(
        &self,
        id: i64,
        output_data: &str,
        tokens_used: i64,
        model_used: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE tasks SET output_data = ? WHERE id = ? AND status NOT IN ('closed', 'failed')")
            .bind(output_data)
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.advance(
            id,
            TaskStatus::Closed,
            TaskFields {
                tokens_used: Some(tokens_used),
                model_used: model_used.map(String::from),
                ..Default::default()
            },
        )
        .await
    }

    /// Mark a task failed with the error message. Reachable from any
    /// non-terminal state.
    pub async fn fail(&self, id: i64, error_msg: &str) -> Result<()> {
        sqlx::query("UPDATE tasks SET error_msg = ? WHERE id = ? AND status NOT IN ('closed', 'failed')")
            .bind(error_msg)
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.advance(id, TaskStatus::Failed, TaskFields::default()).await
    }

    async fn status_of(&self, id: i64) -> Result<TaskStatus> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let status = status.ok_or(EngineError::NotFound {
            kind: "task",
            id: id.to_string(),
        })?;

        TaskStatus::parse(&status).ok_or_else(|| {
            EngineError::Persistence(format!("task {} has unknown status '{}'", id, status))
        })
    }
}

fn row_to_task(r: sqlx::sqlite::SqliteRow) -> TaskRecord {
    TaskRecord {
        id: r.get("id"),
        session_id: r.get("session_id"),
        title: r.get("title"),
        skill_name: r.get("skill_name"),
        task_type: r.get("task_type"),
        status: TaskStatus::parse(&r.get::<String, _>("status")).unwrap_or(TaskStatus::Failed),
        input_data: r.get("input_data"),
        output_data: r.get("output_data"),
        governor_ok: r.get("governor_ok"),
        model_used: r.get("model_used"),
        tokens_used: r.get("tokens_used"),
        error_msg: r.get("error_msg"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
        closed_at: r.get("closed_at"),
    }
}
