//! Session store
//!
//! A session is a bounded interaction context. Once ended it is immutable;
//! context merges while active are append-only (keys are added or
//! replaced, never removed).

use crate::db::now_unix;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

/// Durable session record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: i64,
    pub name: String,
    pub status: String,
    pub context: String,
    pub goal_ids: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SessionRecord {
    pub fn is_ended(&self) -> bool {
        self.status == "ended"
    }
}

/// Session persistence operations
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a session with status `active`.
    pub async fn create(&self, name: &str, context: &str) -> Result<i64> {
        let now = now_unix();
        let result = sqlx::query(
            "INSERT INTO sessions (name, status, context, created_at, updated_at) \
             VALUES (?, 'active', ?, ?, ?)",
        )
        .bind(name)
        .bind(context)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        tracing::debug!(session_id = id, name, "session created");
        Ok(id)
    }

    pub async fn get(&self, id: i64) -> Result<Option<SessionRecord>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(row_to_session))
    }

    pub async fn list_active(&self) -> Result<Vec<SessionRecord>> {
        let rows = sqlx::query("SELECT * FROM sessions WHERE status = 'active' ORDER BY id DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(row_to_session).collect())
    }

    /// End a session. Ending an already-ended session is a no-op.
    pub async fn end(&self, id: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE sessions SET status = 'ended', updated_at = ? WHERE id = ? AND status = 'active'",
        )
        .bind(now_unix())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 && self.get(id).await?.is_none() {
            return Err(EngineError::NotFound {
                kind: "session",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Merge keys into the session context. Existing keys are replaced,
    /// no key is ever removed. Rejected once the session has ended.
    pub async fn merge_context(&self, id: i64, additions: &serde_json::Value) -> Result<()> {
        let session = self.get(id).await?.ok_or(EngineError::NotFound {
            kind: "session",
            id: id.to_string(),
        })?;
        if session.is_ended() {
            return Err(EngineError::InvalidTransition {
                from: "ended".to_string(),
                to: "active".to_string(),
            });
        }

        let mut context: serde_json::Value =
            serde_json::from_str(&session.context).unwrap_or_else(|_| serde_json::json!({}));
        if let (Some(base), Some(extra)) = (context.as_object_mut(), additions.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }

        let result = sqlx::query(
            "UPDATE sessions SET context = ?, updated_at = ? WHERE id = ? AND status = 'active'",
        )
        .bind(context.to_string())
        .bind(now_unix())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Ended between the read and the write.
            return Err(EngineError::InvalidTransition {
                from: "ended".to_string(),
                to: "active".to_string(),
            });
        }
        Ok(())
    }

    /// Append a goal id to the session's ordered goal list if absent.
    pub async fn link_goal(&self, id: i64, goal_id: i64) -> Result<()> {
        let session = self.get(id).await?.ok_or(EngineError::NotFound {
            kind: "session",
            id: id.to_string(),
        })?;
        if session.is_ended() {
            return Ok(());
        }

        let mut goal_ids: Vec<i64> =
            serde_json::from_str(&session.goal_ids).unwrap_or_default();
        if goal_ids.contains(&goal_id) {
            return Ok(());
        }
        goal_ids.push(goal_id);

        sqlx::query(
            "UPDATE sessions SET goal_ids = ?, updated_at = ? WHERE id = ? AND status = 'active'",
        )
        .bind(serde_json::to_string(&goal_ids).unwrap_or_else(|_| "[]".to_string()))
        .bind(now_unix())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_session(r: sqlx::sqlite::SqliteRow) -> SessionRecord {
    SessionRecord {
        id: r.get("id"),
        name: r.get("name"),
        status: r.get("status"),
        context: r.get("context"),
        goal_ids: r.get("goal_ids"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}
