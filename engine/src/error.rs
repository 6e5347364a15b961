//! Error types for the engine
//!
//! All component boundaries return `EngineError` variants rather than
//! throwing opaque failures across layers. The orchestrator folds most of
//! these into the `error` field of a cycle result; only genuinely
//! unexpected faults cross the API boundary as 500-class errors.

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Main engine error type
///
/// # Error Categories
///
/// - **Lifecycle**: illegal state transitions, conflicts on terminal or
///   occupied resources
/// - **Governor**: policy denial of a proposed action (not a system
///   fault; normally reported through the cycle result, never thrown
///   across the API boundary)
/// - **Skills**: unresolved capability lookups and invocation failures
/// - **Model routing**: all provider candidates exhausted
/// - **Persistence**: durable-write failures (fatal to the in-flight cycle)
/// - **Configuration**: invalid or missing configuration
#[derive(Debug, Error)]
pub enum EngineError {
    /// A task state transition not permitted by the state machine
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Any mutation attempted on a task already in a terminal state
    #[error("task {0} is closed")]
    TaskClosed(i64),

    /// Agent already holds a current task
    #[error("agent {0} is busy")]
    AgentBusy(i64),

    /// Governor denied the proposed action
    #[error("governor blocked (score {score}): {reason}")]
    GovernorBlocked { score: u8, reason: String },

    /// Skill name could not be resolved by the skill manager
    #[error("skill not found: {0}")]
    SkillNotFound(String),

    /// Skill resolved but its invocation failed
    #[error("skill '{name}' failed: {message}")]
    SkillFailed { name: String, message: String },

    /// Every ranked provider candidate failed or timed out
    #[error("no provider available after {attempts} attempts")]
    NoProviderAvailable { attempts: usize },

    /// Durable-write failure; the attempted mutation was not committed
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Unknown task / session / agent / goal / job id
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether the error maps to a 404-class response at the API boundary.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            EngineError::SkillNotFound(_) | EngineError::NotFound { .. }
        )
    }

    /// Whether the error is a conflict on a terminal or occupied resource.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            EngineError::TaskClosed(_)
                | EngineError::AgentBusy(_)
                | EngineError::InvalidTransition { .. }
        )
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::Persistence(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(EngineError::SkillNotFound("x".into()).is_not_found());
        assert!(EngineError::NotFound {
            kind: "task",
            id: "9".into()
        }
        .is_not_found());
        assert!(!EngineError::TaskClosed(1).is_not_found());
    }

    #[test]
    fn test_conflict_classification() {
        assert!(EngineError::AgentBusy(3).is_conflict());
        assert!(EngineError::TaskClosed(3).is_conflict());
        assert!(EngineError::InvalidTransition {
            from: "closed".into(),
            to: "executing".into()
        }
        .is_conflict());
        assert!(!EngineError::Config("bad".into()).is_conflict());
        assert!(!EngineError::GovernorBlocked {
            score: 95,
            reason: "matched rules: destructive_verb".into()
        }
        .is_conflict());
    }

    #[test]
    fn test_display_messages() {
        let e = EngineError::InvalidTransition {
            from: "created".into(),
            to: "verifying".into(),
        };
        assert_eq!(e.to_string(), "invalid transition: created -> verifying");

        let e = EngineError::NoProviderAvailable { attempts: 3 };
        assert_eq!(e.to_string(), "no provider available after 3 attempts");

        let e = EngineError::GovernorBlocked {
            score: 100,
            reason: "matched rules: dangerous_flags".into(),
        };
        assert_eq!(
            e.to_string(),
            "governor blocked (score 100): matched rules: dangerous_flags"
        );
    }

    #[test]
    fn test_persistence_from_sqlx() {
        let e = EngineError::from(sqlx::Error::RowNotFound);
        assert!(matches!(e, EngineError::Persistence(_)));
    }
}
