//! Governor audit log
//!
//! Append-only record of every governor decision. No update or delete
//! path exists; atomic INSERT is the only write.

use crate::db::now_unix;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

/// One governor decision as persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub action: String,
    pub decision: String,
    pub risk_score: i64,
    pub reason: Option<String>,
    pub context: String,
    pub created_at: i64,
}

/// Append-only audit repository
pub struct AuditStore {
    pool: SqlitePool,
}

impl AuditStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append one decision entry.
    pub async fn append(
        &self,
        action: &str,
        decision: &str,
        risk_score: u8,
        reason: &str,
        context: &str,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO audit_log (action, decision, risk_score, reason, context, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(action)
        .bind(decision)
        .bind(risk_score as i64)
        .bind(reason)
        .bind(context)
        .bind(now_unix())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// List most recent entries.
    pub async fn list_recent(&self, limit: i64) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query("SELECT * FROM audit_log ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| AuditEntry {
                id: r.get("id"),
                action: r.get("action"),
                decision: r.get("decision"),
                risk_score: r.get("risk_score"),
                reason: r.get("reason"),
                context: r.get("context"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_log")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
