//! Cron job registry and trigger source
//!
//! Jobs are durable rows keyed by a unique name, carrying either a cron
//! expression or an interval, a target skill, a static input payload, and
//! a `governor_required` flag. The registry is a pure caller of the
//! orchestrator: every firing goes through `Orchestrator::run` with
//! `source = "cron"` and shares no other state with it.
//!
//! Interval jobs are fired by the built-in tick loop. Cron-expression
//! jobs are shape-validated and persisted, but the decision of *when*
//! they fire belongs to an external trigger calling `trigger_now`.

use crate::error::{EngineError, Result};
use crate::db::now_unix;
use crate::orchestrator::{CycleRequest, CycleResult, Orchestrator};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Durable cron job record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    pub id: i64,
    pub name: String,
    pub cron_expr: Option<String>,
    pub interval_s: Option<i64>,
    pub skill_name: String,
    pub input_data: String,
    pub enabled: bool,
    pub governor_required: bool,
    pub last_run: Option<i64>,
    pub next_run: Option<i64>,
    pub run_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Job registry plus the interval tick loop
pub struct CronSystem {
    pool: SqlitePool,
    orchestrator: Arc<Orchestrator>,
    tick: Duration,
    shutdown_tx: watch::Sender<bool>,
}

impl CronSystem {
    pub fn new(pool: SqlitePool, orchestrator: Arc<Orchestrator>, tick_seconds: u64) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            pool,
            orchestrator,
            tick: Duration::from_secs(tick_seconds.max(1)),
            shutdown_tx,
        }
    }

    /// Register (or redefine) an interval job. The unique name keeps job
    /// identity stable across re-registration.
    pub async fn add_interval(
        &self,
        name: &str,
        interval_s: i64,
        skill_name: &str,
        input_data: &serde_json::Value,
        governor_required: bool,
    ) -> Result<CronJob> {
        if interval_s <= 0 {
            return Err(EngineError::Config(format!(
                "interval for job '{name}' must be positive"
            )));
        }
        let now = now_unix();
        self.upsert(
            name,
            None,
            Some(interval_s),
            skill_name,
            input_data,
            governor_required,
            Some(now + interval_s),
        )
        .await
    }

    /// Register (or redefine) a cron-expression job. Only the five-field
    /// shape is validated here; firing is the external trigger's call.
    pub async fn add_cron(
        &self,
        name: &str,
        cron_expr: &str,
        skill_name: &str,
        input_data: &serde_json::Value,
        governor_required: bool,
    ) -> Result<CronJob> {
        validate_cron_expr(cron_expr)?;
        self.upsert(name, Some(cron_expr), None, skill_name, input_data, governor_required, None)
            .await
    }

    async fn upsert(
        &self,
        name: &str,
        cron_expr: Option<&str>,
        interval_s: Option<i64>,
        skill_name: &str,
        input_data: &serde_json::Value,
        governor_required: bool,
        next_run: Option<i64>,
    ) -> Result<CronJob> {
        let now = now_unix();
        sqlx::query(
            "INSERT INTO cron_jobs \
             (name, cron_expr, interval_s, skill_name, input_data, governor_required, next_run, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(name) DO UPDATE SET \
               cron_expr = excluded.cron_expr, \
               interval_s = excluded.interval_s, \
               skill_name = excluded.skill_name, \
               input_data = excluded.input_data, \
               governor_required = excluded.governor_required, \
               next_run = excluded.next_run, \
               updated_at = excluded.updated_at",
        )
        .bind(name)
        .bind(cron_expr)
        .bind(interval_s)
        .bind(skill_name)
        .bind(input_data.to_string())
        .bind(governor_required)
        .bind(next_run)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        info!(job = name, skill = skill_name, "cron job registered");
        self.get(name).await?.ok_or(EngineError::NotFound {
            kind: "cron job",
            id: name.to_string(),
        })
    }

    pub async fn get(&self, name: &str) -> Result<Option<CronJob>> {
        let row = sqlx::query("SELECT * FROM cron_jobs WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(row_to_job))
    }

    pub async fn list_jobs(&self) -> Result<Vec<CronJob>> {
        let rows = sqlx::query("SELECT * FROM cron_jobs ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(row_to_job).collect())
    }

    pub async fn remove(&self, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM cron_jobs WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Fire a job immediately, regardless of its schedule.
    pub async fn trigger_now(&self, name: &str) -> Result<CycleResult> {
        let job = self.get(name).await?.ok_or(EngineError::NotFound {
            kind: "cron job",
            id: name.to_string(),
        })?;
        self.fire(&job).await
    }

    /// One firing: bump the run bookkeeping on the same job row, then run
    /// a fresh cycle through the orchestrator.
    async fn fire(&self, job: &CronJob) -> Result<CycleResult> {
        let now = now_unix();
        let next_run = job.interval_s.map(|i| now + i);
        sqlx::query(
            "UPDATE cron_jobs SET run_count = run_count + 1, last_run = ?, \
             next_run = COALESCE(?, next_run), updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(next_run)
        .bind(now)
        .bind(job.id)
        .execute(&self.pool)
        .await?;

        let context: serde_json::Value =
            serde_json::from_str(&job.input_data).unwrap_or_else(|_| serde_json::json!({}));

        let request = CycleRequest {
            command: format!("cron job '{}': run skill '{}'", job.name, job.skill_name),
            source: "cron".to_string(),
            session_id: None,
            goal_id: None,
            context,
            skill_hint: Some(job.skill_name.clone()),
            task_type: "cron".to_string(),
            budget: "low".to_string(),
            governor_override: false,
            // Documented escape hatch, bounded to pre-declared jobs.
            skip_governor: !job.governor_required,
        };

        info!(job = %job.name, "cron job firing");
        self.orchestrator.run(request).await
    }

    /// Start the interval tick loop. Returns a handle; the loop stops
    /// when `shutdown` is called.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let system = self;
        let mut shutdown_rx = system.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(system.tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(tick_secs = system.tick.as_secs(), "cron loop started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        system.run_due_jobs().await;
                    }
                    _ = shutdown_rx.changed() => {
                        info!("cron loop stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Signal the tick loop to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Fire every enabled interval job whose next_run has passed.
    async fn run_due_jobs(&self) {
        let now = now_unix();
        let due = sqlx::query(
            "SELECT * FROM cron_jobs \
             WHERE enabled = 1 AND interval_s IS NOT NULL AND next_run IS NOT NULL AND next_run <= ?",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await;

        let due = match due {
            Ok(rows) => rows.into_iter().map(row_to_job).collect::<Vec<_>>(),
            Err(e) => {
                warn!(error = %e, "cron scan failed");
                return;
            }
        };

        // Cycles are independent; due jobs fire concurrently.
        let outcomes = futures::future::join_all(due.iter().map(|job| self.fire(job))).await;
        for (job, outcome) in due.iter().zip(outcomes) {
            match outcome {
                Ok(result) if result.success => {
                    info!(job = %job.name, task_id = ?result.task_id, "cron job completed");
                }
                Ok(result) => {
                    warn!(job = %job.name, error = ?result.error, "cron job cycle did not complete");
                }
                Err(e) => {
                    warn!(job = %job.name, error = %e, "cron job failed to run");
                }
            }
        }
    }
}

/// Check the five-field cron shape without interpreting it.
fn validate_cron_expr(expr: &str) -> Result<()> {
    let shape = Regex::new(r"^\s*\S+\s+\S+\s+\S+\s+\S+\s+\S+\s*$").expect("static cron shape regex");
    if !shape.is_match(expr) {
        return Err(EngineError::Config(format!(
            "cron expression '{expr}' must have five whitespace-separated fields"
        )));
    }
    Ok(())
}

fn row_to_job(r: sqlx::sqlite::SqliteRow) -> CronJob {
    CronJob {
        id: r.get("id"),
        name: r.get("name"),
        cron_expr: r.get("cron_expr"),
        interval_s: r.get("interval_s"),
        skill_name: r.get("skill_name"),
        input_data: r.get("input_data"),
        enabled: r.get("enabled"),
        governor_required: r.get("governor_required"),
        last_run: r.get("last_run"),
        next_run: r.get("next_run"),
        run_count: r.get("run_count"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cron_expr_shape() {
        assert!(validate_cron_expr("*/5 * * * *").is_ok());
        assert!(validate_cron_expr("0 9 * * 1-5").is_ok());
        assert!(validate_cron_expr("* * *").is_err());
        assert!(validate_cron_expr("").is_err());
        assert!(validate_cron_expr("a b c d e f").is_err());
    }
}
