//! SQLite persistence for workflows: CRUD, atomic plan replacement, task
//! appends and removals with dependency rewiring, and the single-writer
//! session lock.

use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::domain::clock;
use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::ids::{RepoId, SessionId, TaskId, WorkflowId};
use crate::domain::models::{
    LockOutcome, SourceType, Task, TaskDependency, Workflow, WorkflowStatus,
};

/// Listing filter for workflows.
#[derive(Debug, Clone, Default)]
pub struct WorkflowFilter {
    pub status: Option<WorkflowStatus>,
    pub repository_id: Option<RepoId>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Lock state joined with the holding session.
#[derive(Debug, Clone, PartialEq)]
pub struct LockInfo {
    pub locked: bool,
    pub session_id: Option<SessionId>,
    pub locked_at: Option<chrono::DateTime<chrono::Utc>>,
    pub session_pid: Option<u32>,
}

#[derive(Clone)]
pub struct SqliteWorkflowRepository {
    pool: SqlitePool,
}

impl SqliteWorkflowRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, workflow: &Workflow) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO workflows (id, name, source_type, source_ref, source_content, status,
             initial_plan, plan_summary, max_parallel_tasks, auto_create_workspaces, config,
             created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(workflow.id.as_str())
        .bind(&workflow.name)
        .bind(workflow.source_type.as_str())
        .bind(&workflow.source_ref)
        .bind(&workflow.source_content)
        .bind(workflow.status.as_str())
        .bind(super::to_json_opt(&workflow.initial_plan)?)
        .bind(&workflow.plan_summary)
        .bind(i64::from(workflow.max_parallel_tasks))
        .bind(i32::from(workflow.auto_create_workspaces))
        .bind(serde_json::to_string(&workflow.config)?)
        .bind(super::to_ms(workflow.created_at))
        .bind(super::to_ms(workflow.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &WorkflowId) -> CoreResult<Option<Workflow>> {
        let row: Option<WorkflowRow> = sqlx::query_as("SELECT * FROM workflows WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Workflow::try_from).transpose()
    }

    /// Fetch a workflow or raise `NotFound`.
    pub async fn require(&self, id: &WorkflowId) -> CoreResult<Workflow> {
        self.get(id)
            .await?
            .ok_or_else(|| CoreError::not_found("workflow", id.as_str()))
    }

    pub async fn list(&self, filter: &WorkflowFilter) -> CoreResult<Vec<Workflow>> {
        let mut query = String::from("SELECT w.* FROM workflows w");
        let mut clauses: Vec<&str> = Vec::new();
        if filter.repository_id.is_some() {
            query.push_str(
                " INNER JOIN workflow_repositories wr ON wr.workflow_id = w.id",
            );
            clauses.push("wr.repository_id = ?");
        }
        if filter.status.is_some() {
            clauses.push("w.status = ?");
        }
        if !clauses.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&clauses.join(" AND "));
        }
        query.push_str(" ORDER BY w.updated_at DESC LIMIT ? OFFSET ?");

        let mut q = sqlx::query_as::<_, WorkflowRow>(&query);
        if let Some(repo_id) = &filter.repository_id {
            q = q.bind(repo_id.as_str().to_string());
        }
        if let Some(status) = &filter.status {
            q = q.bind(status.as_str());
        }
        q = q
            .bind(i64::from(filter.limit.unwrap_or(50)))
            .bind(i64::from(filter.offset.unwrap_or(0)));

        let rows: Vec<WorkflowRow> = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(Workflow::try_from).collect()
    }

    pub async fn set_status(&self, id: &WorkflowId, status: WorkflowStatus) -> CoreResult<()> {
        let result = sqlx::query("UPDATE workflows SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(clock::now_ms())
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("workflow", id.as_str()));
        }
        Ok(())
    }

    pub async fn set_parallelism(&self, id: &WorkflowId, max_parallel: u32) -> CoreResult<()> {
        let result =
            sqlx::query("UPDATE workflows SET max_parallel_tasks = ?, updated_at = ? WHERE id = ?")
                .bind(i64::from(max_parallel))
                .bind(clock::now_ms())
                .bind(id.as_str())
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("workflow", id.as_str()));
        }
        Ok(())
    }

    pub async fn set_config(&self, id: &WorkflowId, config: &serde_json::Value) -> CoreResult<()> {
        let result = sqlx::query("UPDATE workflows SET config = ?, updated_at = ? WHERE id = ?")
            .bind(serde_json::to_string(config)?)
            .bind(clock::now_ms())
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("workflow", id.as_str()));
        }
        Ok(())
    }

    pub async fn link_repository(&self, id: &WorkflowId, repository_id: &RepoId) -> CoreResult<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO workflow_repositories (workflow_id, repository_id, added_at)
             VALUES (?, ?, ?)",
        )
        .bind(id.as_str())
        .bind(repository_id.as_str())
        .bind(clock::now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn linked_repository_ids(&self, id: &WorkflowId) -> CoreResult<Vec<RepoId>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT repository_id FROM workflow_repositories WHERE workflow_id = ? ORDER BY added_at",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|(id,)| super::parse_id(&id)).collect()
    }

    /// Atomically replace the workflow's plan: delete any pre-existing tasks
    /// (cascading to their edges and checkpoints), insert the new tasks and
    /// edges, record the plan, and move the workflow to `status`. Either the
    /// whole plan lands or nothing does.
    pub async fn replace_plan(
        &self,
        id: &WorkflowId,
        plan_summary: Option<&str>,
        initial_plan: &serde_json::Value,
        tasks: &[Task],
        dependencies: &[TaskDependency],
        status: WorkflowStatus,
    ) -> CoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM tasks WHERE workflow_id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;

        for task in tasks {
            insert_task(&mut tx, task).await?;
        }
        for dep in dependencies {
            insert_dependency(&mut tx, dep).await?;
        }

        let result = sqlx::query(
            "UPDATE workflows SET plan_summary = COALESCE(?, plan_summary), initial_plan = ?,
             status = ?, updated_at = ? WHERE id = ?",
        )
        .bind(plan_summary)
        .bind(serde_json::to_string(initial_plan)?)
        .bind(status.as_str())
        .bind(clock::now_ms())
        .bind(id.as_str())
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("workflow", id.as_str()));
        }

        tx.commit().await?;
        Ok(())
    }

    /// Append a task (and its edges) at the end of the plan.
    pub async fn append_task(&self, task: &Task, dependencies: &[TaskDependency]) -> CoreResult<()> {
        let mut tx = self.pool.begin().await?;
        insert_task(&mut tx, task).await?;
        for dep in dependencies {
            insert_dependency(&mut tx, dep).await?;
        }
        sqlx::query("UPDATE workflows SET updated_at = ? WHERE id = ?")
            .bind(clock::now_ms())
            .bind(task.workflow_id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Remove a task, rewiring dependencies transitively so every
    /// predecessor remains an ancestor of every successor, then closing the
    /// sequence gap. Returns the number of rewired edges.
    pub async fn remove_task_rewired(
        &self,
        workflow_id: &WorkflowId,
        task_id: &TaskId,
    ) -> CoreResult<u64> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT status, sequence FROM tasks WHERE id = ? AND workflow_id = ?")
                .bind(task_id.as_str())
                .bind(workflow_id.as_str())
                .fetch_optional(&mut *tx)
                .await?;
        let (status, sequence) =
            row.ok_or_else(|| CoreError::not_found("task", task_id.as_str()))?;
        if status != "pending" && status != "skipped" {
            return Err(CoreError::PreconditionFailed(format!(
                "task {task_id} is {status}; only pending or skipped tasks can be removed"
            )));
        }

        let predecessors: Vec<(String, String)> = sqlx::query_as(
            "SELECT depends_on_id, dependency_type FROM task_dependencies WHERE task_id = ?",
        )
        .bind(task_id.as_str())
        .fetch_all(&mut *tx)
        .await?;
        let successors: Vec<(String, String)> = sqlx::query_as(
            "SELECT task_id, dependency_type FROM task_dependencies WHERE depends_on_id = ?",
        )
        .bind(task_id.as_str())
        .fetch_all(&mut *tx)
        .await?;

        // Rewire x -> removed -> y into x -> y. Only blocking chains carry
        // ordering, so informs edges are dropped rather than rewired.
        let mut rewired = 0u64;
        for (pred, pred_ty) in &predecessors {
            if pred_ty != "blocks" {
                continue;
            }
            for (succ, succ_ty) in &successors {
                if succ_ty != "blocks" || succ == pred {
                    continue;
                }
                let result = sqlx::query(
                    "INSERT OR IGNORE INTO task_dependencies (task_id, depends_on_id, dependency_type)
                     VALUES (?, ?, 'blocks')",
                )
                .bind(succ)
                .bind(pred)
                .execute(&mut *tx)
                .await?;
                rewired += result.rows_affected();
            }
        }

        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(task_id.as_str())
            .execute(&mut *tx)
            .await?;

        // Close the sequence gap to keep positions dense.
        sqlx::query(
            "UPDATE tasks SET sequence = sequence - 1 WHERE workflow_id = ? AND sequence > ?",
        )
        .bind(workflow_id.as_str())
        .bind(sequence)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE workflows SET updated_at = ? WHERE id = ?")
            .bind(clock::now_ms())
            .bind(workflow_id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(rewired)
    }

    /// Compare-and-set lock acquisition. Re-acquiring a held lock refreshes
    /// `locked_at`.
    pub async fn try_lock(
        &self,
        id: &WorkflowId,
        session_id: &SessionId,
    ) -> CoreResult<LockOutcome> {
        let result = sqlx::query(
            "UPDATE workflows SET locked_by_session_id = ?, locked_at = ?
             WHERE id = ? AND (locked_by_session_id IS NULL OR locked_by_session_id = ?)",
        )
        .bind(session_id.as_str())
        .bind(clock::now_ms())
        .bind(id.as_str())
        .bind(session_id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(LockOutcome::Acquired);
        }

        let holder: Option<(Option<String>,)> =
            sqlx::query_as("SELECT locked_by_session_id FROM workflows WHERE id = ?")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        match holder {
            None => Err(CoreError::not_found("workflow", id.as_str())),
            Some((Some(session),)) => Ok(LockOutcome::HeldBy(super::parse_id(&session)?)),
            // Lost the race but the lock is now free; callers retry.
            Some((None,)) => Ok(LockOutcome::HeldBy(session_id.clone())),
        }
    }

    /// Release the lock if held by `session_id`. Returns whether anything
    /// was released.
    pub async fn unlock(&self, id: &WorkflowId, session_id: &SessionId) -> CoreResult<bool> {
        let result = sqlx::query(
            "UPDATE workflows SET locked_by_session_id = NULL, locked_at = NULL
             WHERE id = ? AND locked_by_session_id = ?",
        )
        .bind(id.as_str())
        .bind(session_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn lock_info(&self, id: &WorkflowId) -> CoreResult<LockInfo> {
        let row: Option<(Option<String>, Option<i64>, Option<i64>)> = sqlx::query_as(
            "SELECT w.locked_by_session_id, w.locked_at, s.pid
             FROM workflows w LEFT JOIN sessions s ON s.id = w.locked_by_session_id
             WHERE w.id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        let (session_id, locked_at, pid) =
            row.ok_or_else(|| CoreError::not_found("workflow", id.as_str()))?;
        Ok(LockInfo {
            locked: session_id.is_some(),
            session_id: super::parse_optional_id(session_id)?,
            locked_at: super::from_ms_opt(locked_at),
            session_pid: pid.map(|p| p as u32),
        })
    }

    pub async fn delete(&self, id: &WorkflowId) -> CoreResult<()> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("workflow", id.as_str()));
        }
        Ok(())
    }
}

async fn insert_task(tx: &mut Transaction<'_, Sqlite>, task: &Task) -> CoreResult<()> {
    sqlx::query(
        "INSERT INTO tasks (id, workflow_id, name, description, status, sequence, parallel_group,
         plan, plan_summary, context, context_from, outcome, outcome_detail, workspace_id,
         repository_id, assigned_agent_id, claimed_at, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(task.id.as_str())
    .bind(task.workflow_id.as_str())
    .bind(&task.name)
    .bind(&task.description)
    .bind(task.status.as_str())
    .bind(i64::from(task.sequence))
    .bind(&task.parallel_group)
    .bind(super::to_json_opt(&task.plan)?)
    .bind(&task.plan_summary)
    .bind(super::to_json_opt(&task.context)?)
    .bind(super::to_json_opt(&task.context_from)?)
    .bind(&task.outcome)
    .bind(&task.outcome_detail)
    .bind(task.workspace_id.as_ref().map(|id| id.as_str().to_string()))
    .bind(task.repository_id.as_ref().map(|id| id.as_str().to_string()))
    .bind(task.assigned_agent_id.as_ref().map(|id| id.as_str().to_string()))
    .bind(super::to_ms_opt(task.claimed_at))
    .bind(super::to_ms(task.created_at))
    .bind(super::to_ms(task.updated_at))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_dependency(
    tx: &mut Transaction<'_, Sqlite>,
    dep: &TaskDependency,
) -> CoreResult<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO task_dependencies (task_id, depends_on_id, dependency_type)
         VALUES (?, ?, ?)",
    )
    .bind(dep.task_id.as_str())
    .bind(dep.depends_on_id.as_str())
    .bind(dep.dependency_type.as_str())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[derive(sqlx::FromRow)]
struct WorkflowRow {
    id: String,
    name: String,
    source_type: String,
    source_ref: Option<String>,
    source_content: Option<String>,
    status: String,
    initial_plan: Option<String>,
    plan_summary: Option<String>,
    max_parallel_tasks: i64,
    auto_create_workspaces: i64,
    config: String,
    locked_by_session_id: Option<String>,
    locked_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<WorkflowRow> for Workflow {
    type Error = CoreError;

    fn try_from(row: WorkflowRow) -> Result<Self, Self::Error> {
        let status = WorkflowStatus::from_str(&row.status).ok_or_else(|| {
            CoreError::Serialization(format!("invalid workflow status: {}", row.status))
        })?;
        let source_type = SourceType::from_str(&row.source_type).ok_or_else(|| {
            CoreError::Serialization(format!("invalid source type: {}", row.source_type))
        })?;
        Ok(Workflow {
            id: super::parse_id(&row.id)?,
            name: row.name,
            source_type,
            source_ref: row.source_ref,
            source_content: row.source_content,
            status,
            initial_plan: super::parse_json_opt(row.initial_plan)?,
            plan_summary: row.plan_summary,
            max_parallel_tasks: row.max_parallel_tasks.max(1) as u32,
            auto_create_workspaces: row.auto_create_workspaces != 0,
            config: super::parse_json(&row.config)?,
            locked_by_session_id: super::parse_optional_id(row.locked_by_session_id)?,
            locked_at: super::from_ms_opt(row.locked_at),
            created_at: super::from_ms(row.created_at),
            updated_at: super::from_ms(row.updated_at),
        })
    }
}
