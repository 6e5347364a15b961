//! Goal tracker
//!
//! Goals are long-lived objectives tracked across sessions. Progress
//! lives in [0.0, 1.0] and is monotonic while a goal is active; resuming
//! from pause may reset it explicitly. `completed` and `abandoned` are
//! final.

use crate::db::now_unix;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

/// Goal status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
    Active,
    Paused,
    Completed,
    Abandoned,
}

impl GoalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoalStatus::Active => "active",
            GoalStatus::Paused => "paused",
            GoalStatus::Completed => "completed",
            GoalStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(GoalStatus::Active),
            "paused" => Some(GoalStatus::Paused),
            "completed" => Some(GoalStatus::Completed),
            "abandoned" => Some(GoalStatus::Abandoned),
            _ => None,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, GoalStatus::Completed | GoalStatus::Abandoned)
    }
}

/// Durable goal record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalRecord {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub status: GoalStatus,
    pub progress: f64,
    pub priority: i64,
    pub context: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Goal persistence and progress operations
pub struct GoalTracker {
    pool: SqlitePool,
}

impl GoalTracker {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        title: &str,
        description: &str,
        priority: i64,
        context: &serde_json::Value,
    ) -> Result<i64> {
        let now = now_unix();
        let result = sqlx::query(
            "INSERT INTO goals (title, description, status, priority, context, created_at, updated_at) \
             VALUES (?, ?, 'active', ?, ?, ?, ?)",
        )
        .bind(title)
        .bind(description)
        .bind(priority)
        .bind(context.to_string())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get(&self, id: i64) -> Result<Option<GoalRecord>> {
        let row = sqlx::query("SELECT * FROM goals WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(row_to_goal))
    }

    pub async fn list_all(&self) -> Result<Vec<GoalRecord>> {
        let rows = sqlx::query("SELECT * FROM goals ORDER BY priority DESC, id DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(row_to_goal).collect())
    }

    pub async fn list_active(&self) -> Result<Vec<GoalRecord>> {
        let rows =
            sqlx::query("SELECT * FROM goals WHERE status = 'active' ORDER BY priority DESC, id DESC")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(row_to_goal).collect())
    }

    /// Apply a forward progress delta to an active goal. Progress is
    /// clamped to [0.0, 1.0] and never moves backwards here; notes are
    /// appended into the goal context.
    pub async fn update_progress(&self, id: i64, delta: f64, notes: Option<&str>) -> Result<f64> {
        let goal = self.require(id).await?;
        if goal.status != GoalStatus::Active {
            return Err(EngineError::InvalidTransition {
                from: goal.status.as_str().to_string(),
                to: "progress".to_string(),
            });
        }

        let next = (goal.progress + delta.max(0.0)).clamp(0.0, 1.0);

        let mut context: serde_json::Value =
            serde_json::from_str(&goal.context).unwrap_or_else(|_| serde_json::json!({}));
        if let Some(notes) = notes {
            let log = context
                .as_object_mut()
                .map(|o| o.entry("notes").or_insert_with(|| serde_json::json!([])));
            if let Some(serde_json::Value::Array(items)) = log {
                items.push(serde_json::json!(notes));
            }
        }

        sqlx::query(
            "UPDATE goals SET progress = ?, context = ?, updated_at = ? WHERE id = ? AND status = 'active'",
        )
        .bind(next)
        .bind(context.to_string())
        .bind(now_unix())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(next)
    }

    pub async fn pause(&self, id: i64) -> Result<()> {
        self.transition(id, GoalStatus::Paused, &[GoalStatus::Active], None)
            .await
    }

    /// Resume a paused goal. Progress is explicitly reset to zero; this
    /// is the one sanctioned non-monotonic move.
    pub async fn resume(&self, id: i64) -> Result<()> {
        self.transition(id, GoalStatus::Active, &[GoalStatus::Paused], Some(0.0))
            .await
    }

    pub async fn complete(&self, id: i64) -> Result<()> {
        self.transition(
            id,
            GoalStatus::Completed,
            &[GoalStatus::Active, GoalStatus::Paused],
            Some(1.0),
        )
        .await
    }

    pub async fn abandon(&self, id: i64) -> Result<()> {
        self.transition(
            id,
            GoalStatus::Abandoned,
            &[GoalStatus::Active, GoalStatus::Paused],
            None,
        )
        .await
    }

    async fn transition(
        &self,
        id: i64,
        next: GoalStatus,
        allowed_from: &[GoalStatus],
        set_progress: Option<f64>,
    ) -> Result<()> {
        let goal = self.require(id).await?;
        if !allowed_from.contains(&goal.status) {
            return Err(EngineError::InvalidTransition {
                from: goal.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }

        let from_clause: Vec<&str> = allowed_from.iter().map(|s| s.as_str()).collect();
        let result = sqlx::query(&format!(
            "UPDATE goals SET status = ?, progress = COALESCE(?, progress), updated_at = ? \
             WHERE id = ? AND status IN ({})",
            from_clause
                .iter()
                .map(|s| format!("'{s}'"))
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .bind(next.as_str())
        .bind(set_progress)
        .bind(now_unix())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let observed = self.require(id).await?;
            return Err(EngineError::InvalidTransition {
                from: observed.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }

        tracing::debug!(goal_id = id, status = next.as_str(), "goal transitioned");
        Ok(())
    }

    async fn require(&self, id: i64) -> Result<GoalRecord> {
        self.get(id).await?.ok_or(EngineError::NotFound {
            kind: "goal",
            id: id.to_string(),
        })
    }
}

fn row_to_goal(r: sqlx::sqlite::SqliteRow) -> GoalRecord {
    GoalRecord {
        id: r.get("id"),
        title: r.get("title"),
        description: r.get("description"),
        status: GoalStatus::parse(&r.get::<String, _>("status")).unwrap_or(GoalStatus::Abandoned),
        progress: r.get("progress"),
        priority: r.get("priority"),
        context: r.get("context"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn tracker() -> (Database, GoalTracker) {
        let db = Database::in_memory().await.unwrap();
        let tracker = GoalTracker::new(db.pool().clone());
        (db, tracker)
    }

    #[tokio::test]
    async fn test_progress_accumulates_and_clamps() {
        let (_db, t) = tracker().await;
        let id = t
            .create("ship v1", "", 5, &serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(t.update_progress(id, 0.4, None).await.unwrap(), 0.4);
        assert_eq!(t.update_progress(id, 0.4, None).await.unwrap(), 0.8);
        assert_eq!(t.update_progress(id, 0.9, None).await.unwrap(), 1.0);
    }

    #[tokio::test]
    async fn test_progress_never_moves_backwards() {
        let (_db, t) = tracker().await;
        let id = t
            .create("ship v1", "", 5, &serde_json::json!({}))
            .await
            .unwrap();
        t.update_progress(id, 0.5, None).await.unwrap();

        // negative deltas are ignored
        assert_eq!(t.update_progress(id, -0.3, None).await.unwrap(), 0.5);
    }

    #[tokio::test]
    async fn test_pause_blocks_progress_and_resume_resets() {
        let (_db, t) = tracker().await;
        let id = t
            .create("ship v1", "", 5, &serde_json::json!({}))
            .await
            .unwrap();
        t.update_progress(id, 0.5, None).await.unwrap();
        t.pause(id).await.unwrap();

        let err = t.update_progress(id, 0.1, None).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));

        t.resume(id).await.unwrap();
        let goal = t.get(id).await.unwrap().unwrap();
        assert_eq!(goal.status, GoalStatus::Active);
        assert_eq!(goal.progress, 0.0);
    }

    #[tokio::test]
    async fn test_terminal_states_are_final() {
        let (_db, t) = tracker().await;
        let id = t
            .create("ship v1", "", 5, &serde_json::json!({}))
            .await
            .unwrap();
        t.complete(id).await.unwrap();

        assert!(t.pause(id).await.is_err());
        assert!(t.resume(id).await.is_err());
        assert!(t.abandon(id).await.is_err());
        assert!(t.update_progress(id, 0.1, None).await.is_err());

        let goal = t.get(id).await.unwrap().unwrap();
        assert_eq!(goal.status, GoalStatus::Completed);
        assert_eq!(goal.progress, 1.0);
    }

    #[tokio::test]
    async fn test_notes_appended_to_context() {
        let (_db, t) = tracker().await;
        let id = t
            .create("ship v1", "", 5, &serde_json::json!({}))
            .await
            .unwrap();
        t.update_progress(id, 0.2, Some("first milestone")).await.unwrap();
        t.update_progress(id, 0.2, Some("second milestone")).await.unwrap();

        let goal = t.get(id).await.unwrap().unwrap();
        let context: serde_json::Value = serde_json::from_str(&goal.context).unwrap();
        assert_eq!(context["notes"].as_array().unwrap().len(), 2);
    }
}
