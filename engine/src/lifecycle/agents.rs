//! Agent store
//!
//! An agent is a logical executor bound to at most one task at a time.
//! `assign` claims an idle agent with a guarded UPDATE, so of two
//! concurrent assign calls on the same agent exactly one wins and the
//! other fails fast with `AgentBusy`.

use crate::db::now_unix;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

/// Agent status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Busy,
    Terminated,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
            AgentStatus::Terminated => "terminated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(AgentStatus::Idle),
            "busy" => Some(AgentStatus::Busy),
            "terminated" => Some(AgentStatus::Terminated),
            _ => None,
        }
    }
}

/// Durable agent record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: i64,
    pub session_id: Option<i64>,
    pub agent_type: String,
    pub status: AgentStatus,
    pub current_task: Option<i64>,
    pub metadata: String,
    pub created_at: i64,
    pub terminated_at: Option<i64>,
}

/// Agent persistence operations
pub struct AgentStore {
    pool: SqlitePool,
}

impl AgentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Bind a new idle agent to a session.
    pub async fn bind(&self, session_id: Option<i64>, agent_type: &str) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO agents (session_id, agent_type, status, created_at) \
             VALUES (?, ?, 'idle', ?)",
        )
        .bind(session_id)
        .bind(agent_type)
        .bind(now_unix())
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        tracing::debug!(agent_id = id, agent_type, "agent bound");
        Ok(id)
    }

    pub async fn get(&self, id: i64) -> Result<Option<AgentRecord>> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(row_to_agent))
    }

    /// Assign a task to an idle agent.
    ///
    /// Atomic with respect to concurrent assign attempts: the claim is a
    /// single UPDATE guarded on `status = 'idle'`, and the loser of a race
    /// fails with `AgentBusy`.
    pub async fn assign(&self, id: i64, task_id: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE agents SET status = 'busy', current_task = ? WHERE id = ? AND status = 'idle'",
        )
        .bind(task_id)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let agent = self.get(id).await?.ok_or(EngineError::NotFound {
                kind: "agent",
                id: id.to_string(),
            })?;
            return match agent.status {
                AgentStatus::Busy => Err(EngineError::AgentBusy(id)),
                AgentStatus::Terminated => Err(EngineError::InvalidTransition {
                    from: "terminated".to_string(),
                    to: "busy".to_string(),
                }),
                // Raced a release; the caller can retry.
                AgentStatus::Idle => Err(EngineError::AgentBusy(id)),
            };
        }

        tracing::debug!(agent_id = id, task_id, "agent assigned");
        Ok(())
    }

    /// Release a busy agent back to idle. Releasing an idle agent is a
    /// no-op; a terminated agent cannot be released.
    pub async fn release(&self, id: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE agents SET status = 'idle', current_task = NULL WHERE id = ? AND status = 'busy'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let agent = self.get(id).await?.ok_or(EngineError::NotFound {
                kind: "agent",
                id: id.to_string(),
            })?;
            if agent.status == AgentStatus::Terminated {
                return Err(EngineError::InvalidTransition {
                    from: "terminated".to_string(),
                    to: "idle".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Terminate an agent. Terminated agents hold no current task.
    pub async fn terminate(&self, id: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE agents SET status = 'terminated', current_task = NULL, terminated_at = ? \
             WHERE id = ? AND status != 'terminated'",
        )
        .bind(now_unix())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 && self.get(id).await?.is_none() {
            return Err(EngineError::NotFound {
                kind: "agent",
                id: id.to_string(),
            });
        }
        Ok(())
    }
}

fn row_to_agent(r: sqlx::sqlite::SqliteRow) -> AgentRecord {
    AgentRecord {
        id: r.get("id"),
        session_id: r.get("session_id"),
        agent_type: r.get("agent_type"),
        status: AgentStatus::parse(&r.get::<String, _>("status")).unwrap_or(AgentStatus::Terminated),
        current_task: r.get("current_task"),
        metadata: r.get("metadata"),
        created_at: r.get("created_at"),
        terminated_at: r.get("terminated_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_status_parse_roundtrip() {
        for status in [AgentStatus::Idle, AgentStatus::Busy, AgentStatus::Terminated] {
            assert_eq!(AgentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AgentStatus::parse("sleeping"), None);
    }
}
