//! Governor
//!
//! Rule-based risk gate evaluated before any side-effecting action. The
//! score is a sum of weighted rule matches against the action description
//! and its context, clamped to [0, 100], and deterministic for identical
//! inputs. The configured mode decides whether a high score blocks
//! execution, warns, or is only recorded.
//!
//! Every call appends exactly one audit entry regardless of outcome. The
//! governor keeps no mutable state between calls.

use crate::config::{GovernorConfig, GovernorMode};
use crate::error::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

pub mod audit;

pub use audit::{AuditEntry, AuditStore};

/// Decision outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Approved,
    Blocked,
    Warned,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Approved => "APPROVED",
            Outcome::Blocked => "BLOCKED",
            Outcome::Warned => "WARNED",
        }
    }
}

/// Result of one governor evaluation
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub outcome: Outcome,
    pub risk_score: u8,
    pub reason: String,
    mode: GovernorMode,
}

impl Decision {
    /// Whether this decision prevents execution.
    ///
    /// `hard_block` blocks unconditionally; `soft_block` blocks unless the
    /// caller explicitly overrides; `audit_only` and `off` never block. A
    /// WARNED action always proceeds.
    pub fn blocks_execution(&self, override_requested: bool) -> bool {
        if self.outcome != Outcome::Blocked {
            return false;
        }
        match self.mode {
            GovernorMode::HardBlock => true,
            GovernorMode::SoftBlock => !override_requested,
            GovernorMode::AuditOnly | GovernorMode::Off => false,
        }
    }
}

/// One weighted risk rule
struct RiskRule {
    pattern: Regex,
    weight: u8,
    label: &'static str,
}

impl RiskRule {
    fn new(pattern: &str, weight: u8, label: &'static str) -> Self {
        Self {
            // Rules are compiled from static literals; a failure here is a
            // programming error caught by the unit tests.
            pattern: Regex::new(pattern).expect("invalid risk rule pattern"),
            weight,
            label,
        }
    }
}

/// Rule-based risk evaluator
pub struct Governor {
    config: GovernorConfig,
    rules: Vec<RiskRule>,
    audit: AuditStore,
}

impl Governor {
    pub fn new(config: GovernorConfig, pool: SqlitePool) -> Self {
        Self {
            config,
            rules: default_rules(),
            audit: AuditStore::new(pool),
        }
    }

    /// Evaluate a proposed action and append the decision to the audit
    /// log.
    pub async fn evaluate(&self, action: &str, context: &serde_json::Value) -> Result<Decision> {
        let decision = self.score(action, context);

        self.audit
            .append(
                action,
                decision.outcome.as_str(),
                decision.risk_score,
                &decision.reason,
                &context.to_string(),
            )
            .await?;

        tracing::debug!(
            outcome = decision.outcome.as_str(),
            risk_score = decision.risk_score,
            mode = self.config.mode.as_str(),
            "governor decision"
        );

        Ok(decision)
    }

    /// Pure scoring step: deterministic for identical
    /// (action, context, mode, thresholds).
    pub fn score(&self, action: &str, context: &serde_json::Value) -> Decision {
        let haystack = format!("{} {}", action, context).to_lowercase();

        let mut total: u32 = 0;
        let mut matched: Vec<&'static str> = Vec::new();
        for rule in &self.rules {
            if rule.pattern.is_match(&haystack) {
                total += rule.weight as u32;
                matched.push(rule.label);
            }
        }
        let risk_score = total.min(100) as u8;

        let raw_outcome = if risk_score >= self.config.block_threshold {
            Outcome::Blocked
        } else if risk_score >= self.config.warn_threshold {
            Outcome::Warned
        } else {
            Outcome::Approved
        };

        // In `off` mode the thresholds are ignored entirely; `audit_only`
        // keeps the threshold outcome for the log but never blocks (see
        // Decision::blocks_execution).
        let outcome = match self.config.mode {
            GovernorMode::Off => Outcome::Approved,
            _ => raw_outcome,
        };

        let reason = if matched.is_empty() {
            "no risk rules matched".to_string()
        } else {
            format!("matched rules: {}", matched.join(", "))
        };

        Decision {
            outcome,
            risk_score,
            reason,
            mode: self.config.mode,
        }
    }

    pub fn audit_log(&self) -> &AuditStore {
        &self.audit
    }

    pub fn mode(&self) -> GovernorMode {
        self.config.mode
    }
}

/// Built-in rule table. Weights are bounded so no single category can
/// saturate the scale on its own.
fn default_rules() -> Vec<RiskRule> {
    vec![
        RiskRule::new(r"rm\s+-rf|--force|--hard", 40, "dangerous_flags"),
        RiskRule::new(r"\bdelete\b|\bdestroy\b|\bwipe\b|\berase\b", 30, "destructive_verb"),
        RiskRule::new(r"\bdrop\s+table\b|\btruncate\b", 40, "destructive_sql"),
        RiskRule::new(r"\bshutdown\b|\breboot\b|\bkill\s+-9\b", 25, "system_control"),
        RiskRule::new(r"\bsudo\b|\bchmod\s+777\b", 25, "privilege_escalation"),
        RiskRule::new(
            r"\bpassword\b|\bcredential\b|\bapi[_\s]?key\b|\bsecret\b",
            20,
            "credential_access",
        ),
        RiskRule::new(
            r"\bpayment\b|\btransfer\s+funds\b|\bpurchase\b|\bwire\b",
            25,
            "financial",
        ),
        RiskRule::new(r"\bsend\s+email\b|\bpublish\b|\bpost\s+to\b", 10, "external_side_effect"),
        RiskRule::new(r"\bproduction\b|\bprod\b", 10, "production_target"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn governor_with(mode: GovernorMode, pool: SqlitePool) -> Governor {
        Governor::new(
            GovernorConfig {
                mode,
                warn_threshold: 30,
                block_threshold: 60,
            },
            pool,
        )
    }

    async fn pool() -> (Database, SqlitePool) {
        let db = Database::in_memory().await.unwrap();
        let pool = db.pool().clone();
        (db, pool)
    }

    #[tokio::test]
    async fn test_benign_action_approved() {
        let (_db, pool) = pool().await;
        let g = governor_with(GovernorMode::SoftBlock, pool);
        let d = g.score("summarize the weekly report", &serde_json::json!({}));
        assert_eq!(d.outcome, Outcome::Approved);
        assert_eq!(d.risk_score, 0);
        assert!(!d.blocks_execution(false));
    }

    #[tokio::test]
    async fn test_determinism() {
        let (_db, pool) = pool().await;
        let g = governor_with(GovernorMode::SoftBlock, pool);
        let context = serde_json::json!({"target": "staging"});
        let a = g.score("delete old backups", &context);
        let b = g.score("delete old backups", &context);
        assert_eq!(a.outcome, b.outcome);
        assert_eq!(a.risk_score, b.risk_score);
        assert_eq!(a.reason, b.reason);
    }

    #[tokio::test]
    async fn test_score_clamped_to_100() {
        let (_db, pool) = pool().await;
        let g = governor_with(GovernorMode::SoftBlock, pool);
        let d = g.score(
            "sudo rm -rf / then drop table users, wipe passwords, transfer funds and shutdown production",
            &serde_json::json!({}),
        );
        assert_eq!(d.risk_score, 100);
        assert_eq!(d.outcome, Outcome::Blocked);
    }

    #[tokio::test]
    async fn test_warn_band() {
        let (_db, pool) = pool().await;
        let g = governor_with(GovernorMode::SoftBlock, pool);
        // destructive_verb alone: 30 = warn threshold, below block
        let d = g.score("delete the draft", &serde_json::json!({}));
        assert_eq!(d.outcome, Outcome::Warned);
        assert!(!d.blocks_execution(false));
    }

    #[tokio::test]
    async fn test_context_contributes_to_score() {
        let (_db, pool) = pool().await;
        let g = governor_with(GovernorMode::SoftBlock, pool);
        let benign = g.score("run the job", &serde_json::json!({}));
        let risky = g.score("run the job", &serde_json::json!({"cmd": "rm -rf /tmp/x"}));
        assert!(risky.risk_score > benign.risk_score);
    }

    #[tokio::test]
    async fn test_hard_block_has_no_override() {
        let (_db, pool) = pool().await;
        let g = governor_with(GovernorMode::HardBlock, pool);
        let d = g.score("sudo rm -rf / and drop table users", &serde_json::json!({}));
        assert_eq!(d.outcome, Outcome::Blocked);
        assert!(d.blocks_execution(false));
        assert!(d.blocks_execution(true));
    }

    #[tokio::test]
    async fn test_soft_block_override() {
        let (_db, pool) = pool().await;
        let g = governor_with(GovernorMode::SoftBlock, pool);
        let d = g.score("sudo rm -rf / and drop table users", &serde_json::json!({}));
        assert_eq!(d.outcome, Outcome::Blocked);
        assert!(d.blocks_execution(false));
        assert!(!d.blocks_execution(true));
    }

    #[tokio::test]
    async fn test_audit_only_never_blocks() {
        let (_db, pool) = pool().await;
        let g = governor_with(GovernorMode::AuditOnly, pool);
        let d = g.score("sudo rm -rf / and drop table users", &serde_json::json!({}));
        // outcome mirrors thresholds for the log
        assert_eq!(d.outcome, Outcome::Blocked);
        assert!(!d.blocks_execution(false));
    }

    #[tokio::test]
    async fn test_off_mode_approves_and_still_audits() {
        let (_db, pool) = pool().await;
        let g = governor_with(GovernorMode::Off, pool);
        let d = g
            .evaluate("sudo rm -rf / and drop table users", &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(d.outcome, Outcome::Approved);
        assert!(d.risk_score > 0);
        assert_eq!(g.audit_log().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_every_call_appends_audit_entry() {
        let (_db, pool) = pool().await;
        let g = governor_with(GovernorMode::SoftBlock, pool);
        g.evaluate("one", &serde_json::json!({})).await.unwrap();
        g.evaluate("two", &serde_json::json!({})).await.unwrap();
        g.evaluate("sudo rm -rf /", &serde_json::json!({})).await.unwrap();
        assert_eq!(g.audit_log().count().await.unwrap(), 3);

        let entries = g.audit_log().list_recent(10).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].action, "sudo rm -rf /");
    }
}
