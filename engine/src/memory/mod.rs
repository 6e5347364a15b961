//! Memory store
//!
//! Keyword-searchable long-term memory over SQLite FTS5. Entries carry
//! free-form tags, an importance weight, and opaque metadata; search
//! ranks by bm25 with an importance boost. No semantic embedding is
//! involved.

use crate::db::now_unix;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

/// One retrieved memory item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryHit {
    pub id: i64,
    pub content: String,
    pub source: String,
    pub tags: Vec<String>,
    pub importance: f64,
    pub score: f64,
    pub created_at: i64,
}

/// Memory persistence and retrieval
pub struct MemoryStore {
    pool: SqlitePool,
}

impl MemoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Add one memory entry, returning its id.
    pub async fn add(
        &self,
        content: &str,
        source: &str,
        tags: &[String],
        importance: f64,
        metadata: &serde_json::Value,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO memory (content, source, tags, importance, metadata, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(content)
        .bind(source)
        .bind(serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string()))
        .bind(importance.clamp(0.0, 1.0))
        .bind(metadata.to_string())
        .bind(now_unix())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Keyword search, best matches first, bounded to `top_k`.
    ///
    /// bm25 rank is negated so that higher is better, then boosted by the
    /// stored importance weight.
    pub async fn query(&self, text: &str, top_k: i64) -> Result<Vec<MemoryHit>> {
        let match_expr = fts_query(text);
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT m.id, m.content, m.source, m.tags, m.importance, m.created_at, \
                    (-bm25(memory_fts) + m.importance) AS score \
             FROM memory_fts \
             JOIN memory m ON m.id = memory_fts.rowid \
             WHERE memory_fts MATCH ? \
             ORDER BY score DESC \
             LIMIT ?",
        )
        .bind(match_expr)
        .bind(top_k)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_hit).collect())
    }

    /// Search restricted to entries carrying a given tag.
    pub async fn query_tagged(&self, text: &str, tag: &str, top_k: i64) -> Result<Vec<MemoryHit>> {
        let hits = self.query(text, top_k * 4).await?;
        Ok(hits
            .into_iter()
            .filter(|h| h.tags.iter().any(|t| t == tag))
            .take(top_k as usize)
            .collect())
    }

    /// Most recent entries, importance-weighted within the window.
    pub async fn get_recent(&self, limit: i64) -> Result<Vec<MemoryHit>> {
        let rows = sqlx::query(
            "SELECT id, content, source, tags, importance, created_at, importance AS score \
             FROM memory ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_hit).collect())
    }
}

/// Reduce free text to an OR query of sanitized terms so user input can
/// never break FTS syntax.
fn fts_query(text: &str) -> String {
    let terms: Vec<String> = text
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
        })
        .filter(|w| !w.is_empty())
        .map(|w| format!("\"{w}\""))
        .collect();
    terms.join(" OR ")
}

fn row_to_hit(r: sqlx::sqlite::SqliteRow) -> MemoryHit {
    MemoryHit {
        id: r.get("id"),
        content: r.get("content"),
        source: r.get("source"),
        tags: serde_json::from_str(&r.get::<String, _>("tags")).unwrap_or_default(),
        importance: r.get("importance"),
        score: r.get("score"),
        created_at: r.get("created_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn store() -> (Database, MemoryStore) {
        let db = Database::in_memory().await.unwrap();
        let store = MemoryStore::new(db.pool().clone());
        (db, store)
    }

    #[tokio::test]
    async fn test_add_and_query() {
        let (_db, store) = store().await;
        store
            .add(
                "deploy pipeline failed on friday",
                "cycle",
                &["ops".to_string()],
                0.8,
                &serde_json::json!({}),
            )
            .await
            .unwrap();
        store
            .add(
                "lunch options near the office",
                "user",
                &[],
                0.2,
                &serde_json::json!({}),
            )
            .await
            .unwrap();

        let hits = store.query("deploy failure", 5).await.unwrap();
        assert!(!hits.is_empty());
        assert!(hits[0].content.contains("deploy"));
    }

    #[tokio::test]
    async fn test_query_respects_top_k() {
        let (_db, store) = store().await;
        for i in 0..10 {
            store
                .add(
                    &format!("incident report number {i}"),
                    "cycle",
                    &[],
                    0.5,
                    &serde_json::json!({}),
                )
                .await
                .unwrap();
        }
        let hits = store.query("incident report", 3).await.unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn test_query_with_hostile_input_is_safe() {
        let (_db, store) = store().await;
        store
            .add("plain note", "user", &[], 0.5, &serde_json::json!({}))
            .await
            .unwrap();

        // FTS operators and quotes must not produce a syntax error
        let hits = store.query("\"plain* AND (note OR", 5).await.unwrap();
        assert!(!hits.is_empty());

        let hits = store.query("!!! ???", 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_tag_filter() {
        let (_db, store) = store().await;
        store
            .add("tagged entry about deploys", "cycle", &["ops".to_string()], 0.5, &serde_json::json!({}))
            .await
            .unwrap();
        store
            .add("untagged entry about deploys", "cycle", &[], 0.5, &serde_json::json!({}))
            .await
            .unwrap();

        let hits = store.query_tagged("deploys", "ops", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].tags.contains(&"ops".to_string()));
    }

    #[tokio::test]
    async fn test_get_recent_orders_newest_first() {
        let (_db, store) = store().await;
        let first = store
            .add("older", "user", &[], 0.5, &serde_json::json!({}))
            .await
            .unwrap();
        let second = store
            .add("newer", "user", &[], 0.5, &serde_json::json!({}))
            .await
            .unwrap();

        let recent = store.get_recent(2).await.unwrap();
        assert_eq!(recent[0].id, second);
        assert_eq!(recent[1].id, first);
    }
}
