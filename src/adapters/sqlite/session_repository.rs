//! SQLite persistence for sessions, daemon election, and the stale-actor
//! reaper.

use sqlx::SqlitePool;

use crate::domain::clock;
use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::ids::SessionId;
use crate::domain::models::Session;

/// What one reaper pass cleaned up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Stale sessions deleted
    pub sessions_removed: u64,
    /// Workflow locks released on behalf of dead sessions
    pub locks_released: u64,
    /// Stale agents transitioned offline
    pub agents_reaped: u64,
    /// Task claims released from stale agents
    pub claims_released: u64,
}

#[derive(Clone)]
pub struct SqliteSessionRepository {
    pool: SqlitePool,
}

impl SqliteSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, session: &Session) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO sessions (id, pid, started_at, last_heartbeat, is_daemon, metadata)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(session.id.as_str())
        .bind(i64::from(session.pid))
        .bind(super::to_ms(session.started_at))
        .bind(super::to_ms(session.last_heartbeat))
        .bind(i32::from(session.is_daemon))
        .bind(super::to_json_opt(&session.metadata)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &SessionId) -> CoreResult<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as("SELECT * FROM sessions WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Session::try_from).transpose()
    }

    pub async fn list(&self) -> CoreResult<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as("SELECT * FROM sessions ORDER BY started_at")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Session::try_from).collect()
    }

    pub async fn get_daemon(&self) -> CoreResult<Option<Session>> {
        let row: Option<SessionRow> =
            sqlx::query_as("SELECT * FROM sessions WHERE is_daemon = 1 LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;
        row.map(Session::try_from).transpose()
    }

    pub async fn heartbeat(&self, id: &SessionId) -> CoreResult<()> {
        let result = sqlx::query("UPDATE sessions SET last_heartbeat = ? WHERE id = ?")
            .bind(clock::now_ms())
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("session", id.as_str()));
        }
        Ok(())
    }

    /// Promote a session to daemon, demoting any current daemon in the same
    /// transaction so at most one daemon ever exists.
    pub async fn promote_to_daemon(&self, id: &SessionId) -> CoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE sessions SET is_daemon = 0 WHERE is_daemon = 1")
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("UPDATE sessions SET is_daemon = 1 WHERE id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("session", id.as_str()));
        }

        tx.commit().await?;
        Ok(())
    }

    /// Deregister a session, releasing any workflow locks it held.
    pub async fn delete(&self, id: &SessionId) -> CoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE workflows SET locked_by_session_id = NULL, locked_at = NULL
             WHERE locked_by_session_id = ?",
        )
        .bind(id.as_str())
        .execute(&mut *tx)
        .await?;
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("session", id.as_str()));
        }
        tx.commit().await?;
        Ok(())
    }

    /// The stale-actor reaper. One transaction that:
    /// 1. releases workflow locks held by sessions whose heartbeat predates
    ///    the cutoff and deletes those sessions,
    /// 2. releases task claims held by agents whose heartbeat predates the
    ///    cutoff, resetting interrupted tasks to pending,
    /// 3. transitions those agents offline.
    pub async fn cleanup_stale(&self, timeout_ms: i64) -> CoreResult<CleanupReport> {
        let cutoff = clock::now_ms() - timeout_ms.max(0);
        let now = clock::now_ms();
        let mut report = CleanupReport::default();
        let mut tx = self.pool.begin().await?;

        let locks = sqlx::query(
            "UPDATE workflows SET locked_by_session_id = NULL, locked_at = NULL
             WHERE locked_by_session_id IN
               (SELECT id FROM sessions WHERE last_heartbeat < ?)",
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;
        report.locks_released = locks.rows_affected();

        let sessions = sqlx::query("DELETE FROM sessions WHERE last_heartbeat < ?")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?;
        report.sessions_removed = sessions.rows_affected();

        // Interrupted work goes back to the queue before the claim is
        // cleared, while the stale holders are still identifiable.
        sqlx::query(
            "UPDATE tasks SET status = 'pending', updated_at = ?
             WHERE status IN ('planning', 'in_progress', 'paused')
               AND assigned_agent_id IN
                 (SELECT id FROM agents WHERE last_heartbeat < ? AND status != 'offline')",
        )
        .bind(now)
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

        let claims = sqlx::query(
            "UPDATE tasks SET assigned_agent_id = NULL, claimed_at = NULL, updated_at = ?
             WHERE assigned_agent_id IN
               (SELECT id FROM agents WHERE last_heartbeat < ? AND status != 'offline')",
        )
        .bind(now)
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;
        report.claims_released = claims.rows_affected();

        let agents = sqlx::query(
            "UPDATE agents SET status = 'offline', current_task_id = NULL, updated_at = ?
             WHERE last_heartbeat < ? AND status != 'offline'",
        )
        .bind(now)
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;
        report.agents_reaped = agents.rows_affected();

        tx.commit().await?;
        Ok(report)
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    pid: i64,
    started_at: i64,
    last_heartbeat: i64,
    is_daemon: i64,
    metadata: Option<String>,
}

impl TryFrom<SessionRow> for Session {
    type Error = CoreError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(Session {
            id: super::parse_id(&row.id)?,
            pid: row.pid.max(0) as u32,
            started_at: super::from_ms(row.started_at),
            last_heartbeat: super::from_ms(row.last_heartbeat),
            is_daemon: row.is_daemon != 0,
            metadata: super::parse_json_opt(row.metadata)?,
        })
    }
}
