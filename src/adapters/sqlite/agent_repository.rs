//! SQLite persistence for agents.

use sqlx::SqlitePool;

use crate::domain::clock;
use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::ids::{AgentId, TaskId};
use crate::domain::models::{Agent, AgentRole, AgentStatus};

/// Filter for agent listings and broadcast recipient selection.
#[derive(Debug, Clone, Default)]
pub struct AgentFilter {
    pub role: Option<AgentRole>,
    pub status: Option<AgentStatus>,
    pub runtime: Option<String>,
}

#[derive(Clone)]
pub struct SqliteAgentRepository {
    pool: SqlitePool,
}

impl SqliteAgentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, agent: &Agent) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO agents (id, workflow_id, name, runtime, role, status, capabilities,
             current_task_id, workspace_path, last_heartbeat, metadata, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(agent.id.as_str())
        .bind(agent.workflow_id.as_ref().map(|id| id.as_str().to_string()))
        .bind(&agent.name)
        .bind(&agent.runtime)
        .bind(agent.role.as_str())
        .bind(agent.status.as_str())
        .bind(super::to_json_opt(&agent.capabilities)?)
        .bind(agent.current_task_id.as_ref().map(|id| id.as_str().to_string()))
        .bind(&agent.workspace_path)
        .bind(super::to_ms_opt(agent.last_heartbeat))
        .bind(super::to_json_opt(&agent.metadata)?)
        .bind(super::to_ms(agent.created_at))
        .bind(super::to_ms(agent.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &AgentId) -> CoreResult<Option<Agent>> {
        let row: Option<AgentRow> = sqlx::query_as("SELECT * FROM agents WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Agent::try_from).transpose()
    }

    /// Fetch an agent or raise `NotFound`.
    pub async fn require(&self, id: &AgentId) -> CoreResult<Agent> {
        self.get(id)
            .await?
            .ok_or_else(|| CoreError::not_found("agent", id.as_str()))
    }

    pub async fn list(&self, filter: &AgentFilter) -> CoreResult<Vec<Agent>> {
        let mut query = String::from("SELECT * FROM agents WHERE 1=1");
        if filter.role.is_some() {
            query.push_str(" AND role = ?");
        }
        if filter.status.is_some() {
            query.push_str(" AND status = ?");
        }
        if filter.runtime.is_some() {
            query.push_str(" AND runtime = ?");
        }
        query.push_str(" ORDER BY created_at");

        let mut q = sqlx::query_as::<_, AgentRow>(&query);
        if let Some(role) = &filter.role {
            q = q.bind(role.as_str());
        }
        if let Some(status) = &filter.status {
            q = q.bind(status.as_str());
        }
        if let Some(runtime) = &filter.runtime {
            q = q.bind(runtime.clone());
        }

        let rows: Vec<AgentRow> = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(Agent::try_from).collect()
    }

    pub async fn set_status(
        &self,
        id: &AgentId,
        status: AgentStatus,
        current_task_id: Option<&TaskId>,
    ) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE agents SET status = ?, current_task_id = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(current_task_id.map(|id| id.as_str().to_string()))
        .bind(clock::now_ms())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("agent", id.as_str()));
        }
        Ok(())
    }

    pub async fn heartbeat(&self, id: &AgentId) -> CoreResult<()> {
        let now = clock::now_ms();
        let result = sqlx::query("UPDATE agents SET last_heartbeat = ?, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(now)
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("agent", id.as_str()));
        }
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct AgentRow {
    id: String,
    workflow_id: Option<String>,
    name: String,
    runtime: String,
    role: String,
    status: String,
    capabilities: Option<String>,
    current_task_id: Option<String>,
    workspace_path: Option<String>,
    last_heartbeat: Option<i64>,
    metadata: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<AgentRow> for Agent {
    type Error = CoreError;

    fn try_from(row: AgentRow) -> Result<Self, Self::Error> {
        let role = AgentRole::from_str(&row.role)
            .ok_or_else(|| CoreError::Serialization(format!("invalid agent role: {}", row.role)))?;
        let status = AgentStatus::from_str(&row.status).ok_or_else(|| {
            CoreError::Serialization(format!("invalid agent status: {}", row.status))
        })?;
        Ok(Agent {
            id: super::parse_id(&row.id)?,
            workflow_id: super::parse_optional_id(row.workflow_id)?,
            name: row.name,
            runtime: row.runtime,
            role,
            status,
            capabilities: super::parse_json_opt(row.capabilities)?,
            current_task_id: super::parse_optional_id(row.current_task_id)?,
            workspace_path: row.workspace_path,
            last_heartbeat: super::from_ms_opt(row.last_heartbeat),
            metadata: super::parse_json_opt(row.metadata)?,
            created_at: super::from_ms(row.created_at),
            updated_at: super::from_ms(row.updated_at),
        })
    }
}
