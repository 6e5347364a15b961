//! Integration tests for the lifecycle manager
//!
//! Validates the task state machine invariants and the atomicity of
//! agent assignment under concurrent claims.

use tempfile::TempDir;

use archon_engine::db::Database;
use archon_engine::error::EngineError;
use archon_engine::lifecycle::{AgentStatus, LifecycleManager, TaskFields, TaskStatus};

async fn setup(temp_dir: &TempDir) -> (Database, LifecycleManager) {
    let db = Database::new(&temp_dir.path().join("test.db")).await.unwrap();
    let manager = LifecycleManager::new(db.pool().clone());
    (db, manager)
}

#[tokio::test]
async fn test_task_transitions_only_follow_the_chain() {
    let temp_dir = TempDir::new().unwrap();
    let (_db, m) = setup(&temp_dir).await;

    let task = m.tasks.create(None, "walk the chain", "general", "{}").await.unwrap();

    // skipping a stage is rejected without changing the record
    let err = m
        .tasks
        .advance(task.id, TaskStatus::Executing, TaskFields::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
    let record = m.tasks.get(task.id).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Created);

    // the legal chain goes through
    for next in [TaskStatus::Assigned, TaskStatus::Executing, TaskStatus::Verifying] {
        m.tasks.advance(task.id, next, TaskFields::default()).await.unwrap();
    }
    m.tasks.close(task.id, "{}", 0, None).await.unwrap();

    let record = m.tasks.get(task.id).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Closed);
    assert!(record.closed_at.is_some());
}

#[tokio::test]
async fn test_terminal_tasks_reject_every_advance() {
    let temp_dir = TempDir::new().unwrap();
    let (_db, m) = setup(&temp_dir).await;

    let task = m.tasks.create(None, "fails early", "general", "{}").await.unwrap();
    m.tasks.fail(task.id, "gave up").await.unwrap();

    for next in [
        TaskStatus::Assigned,
        TaskStatus::Executing,
        TaskStatus::Verifying,
        TaskStatus::Closed,
        TaskStatus::Failed,
    ] {
        let err = m
            .tasks
            .advance(task.id, next, TaskFields::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::TaskClosed(_)), "{next:?}");
    }
}

#[tokio::test]
async fn test_concurrent_assign_has_exactly_one_winner() {
    let temp_dir = TempDir::new().unwrap();
    let (_db, m) = setup(&temp_dir).await;
    let m = std::sync::Arc::new(m);

    for round in 0..10 {
        let agent_id = m.agents.bind(None, "racer").await.unwrap();
        let task_a = m.tasks.create(None, "first claim", "general", "{}").await.unwrap();
        let task_b = m.tasks.create(None, "second claim", "general", "{}").await.unwrap();

        let m1 = std::sync::Arc::clone(&m);
        let m2 = std::sync::Arc::clone(&m);
        let (a, b) = tokio::join!(
            tokio::spawn(async move { m1.agents.assign(agent_id, task_a.id).await }),
            tokio::spawn(async move { m2.agents.assign(agent_id, task_b.id).await }),
        );
        let a = a.unwrap();
        let b = b.unwrap();

        let winners = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1, "round {round}: exactly one assign must win");

        let loser = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
        assert!(matches!(loser, EngineError::AgentBusy(_)), "round {round}");

        let agent = m.agents.get(agent_id).await.unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Busy);
        assert!(agent.current_task.is_some());
    }
}

#[tokio::test]
async fn test_release_then_reassign() {
    let temp_dir = TempDir::new().unwrap();
    let (_db, m) = setup(&temp_dir).await;

    let agent_id = m.agents.bind(None, "worker").await.unwrap();
    let task = m.tasks.create(None, "one", "general", "{}").await.unwrap();

    m.agents.assign(agent_id, task.id).await.unwrap();
    m.agents.release(agent_id).await.unwrap();

    let task2 = m.tasks.create(None, "two", "general", "{}").await.unwrap();
    m.agents.assign(agent_id, task2.id).await.unwrap();

    let agent = m.agents.get(agent_id).await.unwrap().unwrap();
    assert_eq!(agent.current_task, Some(task2.id));
}
