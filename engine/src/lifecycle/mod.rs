//! Lifecycle manager
//!
//! Owns the Session, Task, and Agent entities and their state machines.
//! No other component writes a status field: everything goes through the
//! command methods here, which load current state, validate the
//! transition, and commit it as a single guarded write.

use sqlx::SqlitePool;

pub mod agents;
pub mod sessions;
pub mod tasks;

pub use agents::{AgentRecord, AgentStatus, AgentStore};
pub use sessions::{SessionRecord, SessionStore};
pub use tasks::{TaskFields, TaskRecord, TaskStatus, TaskStore};

/// Facade over the three entity stores.
///
/// Constructed once at startup and passed by handle to the orchestrator
/// and the API layer.
pub struct LifecycleManager {
    pub sessions: SessionStore,
    pub tasks: TaskStore,
    pub agents: AgentStore,
}

impl LifecycleManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            sessions: SessionStore::new(pool.clone()),
            tasks: TaskStore::new(pool.clone()),
            agents: AgentStore::new(pool),
        }
    }
}
