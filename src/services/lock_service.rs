//! Workflow lock coordinator: a non-blocking, single-writer lock binding a
//! workflow to a session. Callers decide whether to retry on contention.

use sqlx::SqlitePool;

use crate::adapters::sqlite::{LockInfo, SqliteSessionRepository, SqliteWorkflowRepository};
use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::ids::{SessionId, WorkflowId};
use crate::domain::models::LockOutcome;

#[derive(Clone)]
pub struct LockService {
    workflows: SqliteWorkflowRepository,
    sessions: SqliteSessionRepository,
}

impl LockService {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            workflows: SqliteWorkflowRepository::new(pool.clone()),
            sessions: SqliteSessionRepository::new(pool),
        }
    }

    /// Compare-and-set acquisition. Re-acquiring a lock the session already
    /// holds succeeds. An active lock always points at a live session, so a
    /// dead session id is rejected up front.
    pub async fn lock(
        &self,
        workflow_id: &WorkflowId,
        session_id: &SessionId,
    ) -> CoreResult<LockOutcome> {
        if self.sessions.get(session_id).await?.is_none() {
            return Err(CoreError::not_found("session", session_id.as_str()));
        }
        let outcome = self.workflows.try_lock(workflow_id, session_id).await?;
        match &outcome {
            LockOutcome::Acquired => {
                tracing::debug!(workflow_id = %workflow_id, session_id = %session_id, "lock acquired");
            }
            LockOutcome::HeldBy(holder) => {
                tracing::debug!(workflow_id = %workflow_id, holder = %holder, "lock contention");
            }
        }
        Ok(outcome)
    }

    /// Release; true when this session actually held the lock.
    pub async fn unlock(
        &self,
        workflow_id: &WorkflowId,
        session_id: &SessionId,
    ) -> CoreResult<bool> {
        self.workflows.unlock(workflow_id, session_id).await
    }

    /// Lock state joined with the holding session's pid.
    pub async fn lock_info(&self, workflow_id: &WorkflowId) -> CoreResult<LockInfo> {
        self.workflows.lock_info(workflow_id).await
    }
}
