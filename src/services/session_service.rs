//! Session registry: lifecycle, heartbeats, daemon election, and the
//! stale-actor reaper.

use serde_json::Value;
use sqlx::SqlitePool;

use crate::adapters::sqlite::{CleanupReport, SqliteSessionRepository};
use crate::domain::errors::CoreResult;
use crate::domain::ids::SessionId;
use crate::domain::models::Session;

/// Default heartbeat timeout before a session or agent is considered dead.
pub const DEFAULT_SESSION_TIMEOUT_MS: i64 = 5 * 60 * 1000;

/// Registration parameters.
#[derive(Debug, Clone, Default)]
pub struct RegisterSession {
    pub pid: u32,
    pub is_daemon: bool,
    pub metadata: Option<Value>,
}

#[derive(Clone)]
pub struct SessionService {
    sessions: SqliteSessionRepository,
}

impl SessionService {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            sessions: SqliteSessionRepository::new(pool),
        }
    }

    /// Register a session for a process. Daemon registration goes through
    /// the same exclusive election as promotion.
    pub async fn register(&self, params: RegisterSession) -> CoreResult<Session> {
        let mut session = Session::new(params.pid);
        if let Some(metadata) = params.metadata {
            session = session.with_metadata(metadata);
        }
        self.sessions.create(&session).await?;
        if params.is_daemon {
            self.sessions.promote_to_daemon(&session.id).await?;
            session.is_daemon = true;
        }
        tracing::info!(session_id = %session.id, pid = params.pid, "registered session");
        Ok(session)
    }

    pub async fn heartbeat(&self, id: &SessionId) -> CoreResult<()> {
        self.sessions.heartbeat(id).await
    }

    /// Clean shutdown: releases held locks and removes the session.
    pub async fn deregister(&self, id: &SessionId) -> CoreResult<()> {
        self.sessions.delete(id).await?;
        tracing::info!(session_id = %id, "deregistered session");
        Ok(())
    }

    pub async fn get(&self, id: &SessionId) -> CoreResult<Option<Session>> {
        self.sessions.get(id).await
    }

    pub async fn list(&self) -> CoreResult<Vec<Session>> {
        self.sessions.list().await
    }

    pub async fn get_daemon(&self) -> CoreResult<Option<Session>> {
        self.sessions.get_daemon().await
    }

    /// Elect a session as the daemon, demoting any current one.
    pub async fn promote_to_daemon(&self, id: &SessionId) -> CoreResult<()> {
        self.sessions.promote_to_daemon(id).await
    }

    /// The stale-actor reaper: remove sessions whose heartbeat predates the
    /// timeout, releasing their workflow locks, and recover claims from
    /// agents gone equally quiet.
    pub async fn cleanup_stale(&self, timeout_ms: i64) -> CoreResult<CleanupReport> {
        let report = self.sessions.cleanup_stale(timeout_ms).await?;
        if report != CleanupReport::default() {
            tracing::info!(
                sessions_removed = report.sessions_removed,
                locks_released = report.locks_released,
                agents_reaped = report.agents_reaped,
                claims_released = report.claims_released,
                "reaped stale actors"
            );
        }
        Ok(report)
    }

    /// Startup reconciliation: one reaper pass at the default timeout, so
    /// work abandoned by earlier unclean shutdowns is recovered before new
    /// work begins. Sessions of concurrently running processes keep their
    /// heartbeats and survive.
    pub async fn reconcile_at_startup(&self) -> CoreResult<CleanupReport> {
        self.cleanup_stale(DEFAULT_SESSION_TIMEOUT_MS).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{
        create_migrated_test_pool, SqliteAgentRepository, SqliteTaskRepository,
        SqliteWorkflowRepository,
    };
    use crate::domain::clock;
    use crate::domain::models::{Agent, AgentStatus, Task, TaskStatus, Workflow};

    #[tokio::test]
    async fn test_register_heartbeat_deregister() {
        let pool = create_migrated_test_pool().await.unwrap();
        let svc = SessionService::new(pool);

        let session = svc
            .register(RegisterSession {
                pid: 7,
                ..Default::default()
            })
            .await
            .unwrap();
        svc.heartbeat(&session.id).await.unwrap();
        svc.deregister(&session.id).await.unwrap();
        assert!(svc.get(&session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_daemon_registration_is_exclusive() {
        let pool = create_migrated_test_pool().await.unwrap();
        let svc = SessionService::new(pool);

        let first = svc
            .register(RegisterSession {
                pid: 1,
                is_daemon: true,
                ..Default::default()
            })
            .await
            .unwrap();
        let second = svc
            .register(RegisterSession {
                pid: 2,
                is_daemon: true,
                ..Default::default()
            })
            .await
            .unwrap();

        let daemon = svc.get_daemon().await.unwrap().unwrap();
        assert_eq!(daemon.id, second.id);
        assert!(!svc.get(&first.id).await.unwrap().unwrap().is_daemon);
    }

    #[tokio::test]
    async fn test_reaper_recovers_stale_agent_claims() {
        let pool = create_migrated_test_pool().await.unwrap();
        let svc = SessionService::new(pool.clone());
        let workflows = SqliteWorkflowRepository::new(pool.clone());
        let tasks = SqliteTaskRepository::new(pool.clone());
        let agents = SqliteAgentRepository::new(pool.clone());

        let wf = Workflow::new("w");
        workflows.create(&wf).await.unwrap();
        let task = Task::new(wf.id.clone(), "t", 1);
        workflows.append_task(&task, &[]).await.unwrap();

        let mut agent = Agent::new("dead", "test");
        agent.last_heartbeat = Some(clock::from_ms(clock::now_ms() - 600_000));
        agents.create(&agent).await.unwrap();
        tasks.claim(&task.id, &agent.id).await.unwrap();
        let mut claimed = tasks.require(&task.id).await.unwrap();
        claimed.status = TaskStatus::InProgress;
        tasks.update(&claimed).await.unwrap();

        // Session side: one stale session holding the workflow lock
        let mut stale_session = crate::domain::models::Session::new(9);
        stale_session.last_heartbeat = clock::from_ms(clock::now_ms() - 600_000);
        let sessions = SqliteSessionRepository::new(pool);
        sessions.create(&stale_session).await.unwrap();
        workflows.try_lock(&wf.id, &stale_session.id).await.unwrap();

        let report = svc.cleanup_stale(300_000).await.unwrap();
        assert_eq!(report.sessions_removed, 1);
        assert_eq!(report.locks_released, 1);
        assert_eq!(report.agents_reaped, 1);
        assert_eq!(report.claims_released, 1);

        let recovered = tasks.require(&task.id).await.unwrap();
        assert_eq!(recovered.status, TaskStatus::Pending);
        assert!(recovered.assigned_agent_id.is_none());
        assert!(recovered.claimed_at.is_none());

        let agent = agents.require(&agent.id).await.unwrap();
        assert_eq!(agent.status, AgentStatus::Offline);
        assert!(agent.current_task_id.is_none());

        assert!(!workflows.lock_info(&wf.id).await.unwrap().locked);
    }
}
