//! SQLite persistence for tasks: CRUD, dependency edges, the atomic claim
//! compare-and-set, and the transactional finish/replan paths that pair a
//! status write with a checkpoint append.

use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::domain::clock;
use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::ids::{AgentId, CheckpointId, TaskId, WorkflowId};
use crate::domain::models::{
    Checkpoint, CheckpointType, ClaimOutcome, DependencyType, ReleaseOutcome, Task,
    TaskDependency, TaskStatus,
};

/// A blocking predecessor with enough detail to explain why a task waits.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockingPredecessor {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
}

#[derive(Clone)]
pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: &TaskId) -> CoreResult<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Task::try_from).transpose()
    }

    /// Fetch a task or raise `NotFound`.
    pub async fn require(&self, id: &TaskId) -> CoreResult<Task> {
        self.get(id)
            .await?
            .ok_or_else(|| CoreError::not_found("task", id.as_str()))
    }

    pub async fn list_by_workflow(&self, workflow_id: &WorkflowId) -> CoreResult<Vec<Task>> {
        let rows: Vec<TaskRow> =
            sqlx::query_as("SELECT * FROM tasks WHERE workflow_id = ? ORDER BY sequence")
                .bind(workflow_id.as_str())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Task::try_from).collect()
    }

    pub async fn get_by_name(
        &self,
        workflow_id: &WorkflowId,
        name: &str,
    ) -> CoreResult<Option<Task>> {
        let row: Option<TaskRow> =
            sqlx::query_as("SELECT * FROM tasks WHERE workflow_id = ? AND name = ?")
                .bind(workflow_id.as_str())
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Task::try_from).transpose()
    }

    pub async fn max_sequence(&self, workflow_id: &WorkflowId) -> CoreResult<u32> {
        let row: (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(sequence), 0) FROM tasks WHERE workflow_id = ?")
                .bind(workflow_id.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0.max(0) as u32)
    }

    /// Persist the mutable fields of a task.
    pub async fn update(&self, task: &Task) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE tasks SET name = ?, description = ?, status = ?, sequence = ?,
             parallel_group = ?, plan = ?, plan_summary = ?, context = ?, context_from = ?,
             outcome = ?, outcome_detail = ?, workspace_id = ?, repository_id = ?,
             assigned_agent_id = ?, claimed_at = ?, updated_at = ?
             WHERE id = ?",
        )
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
        .bind(clock::now_ms())
        .bind(task.id.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("task", task.id.as_str()));
        }
        Ok(())
    }

    /// Dependency edges this task points at (what it depends on).
    pub async fn dependencies_of(&self, id: &TaskId) -> CoreResult<Vec<TaskDependency>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT task_id, depends_on_id, dependency_type FROM task_dependencies
             WHERE task_id = ?",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(parse_dependency).collect()
    }

    /// Dependency edges pointing at this task (who depends on it).
    pub async fn dependents_of(&self, id: &TaskId) -> CoreResult<Vec<TaskDependency>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT task_id, depends_on_id, dependency_type FROM task_dependencies
             WHERE depends_on_id = ?",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(parse_dependency).collect()
    }

    /// All dependency edges within a workflow.
    pub async fn dependencies_in_workflow(
        &self,
        workflow_id: &WorkflowId,
    ) -> CoreResult<Vec<TaskDependency>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT d.task_id, d.depends_on_id, d.dependency_type
             FROM task_dependencies d
             INNER JOIN tasks t ON t.id = d.task_id
             WHERE t.workflow_id = ?",
        )
        .bind(workflow_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(parse_dependency).collect()
    }

    pub async fn add_dependency(&self, dep: &TaskDependency) -> CoreResult<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO task_dependencies (task_id, depends_on_id, dependency_type)
             VALUES (?, ?, ?)",
        )
        .bind(dep.task_id.as_str())
        .bind(dep.depends_on_id.as_str())
        .bind(dep.dependency_type.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Blocking predecessors of a task that are not yet satisfied.
    pub async fn unsatisfied_blockers(&self, id: &TaskId) -> CoreResult<Vec<BlockingPredecessor>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT dep.id, dep.name, dep.status
             FROM task_dependencies d
             INNER JOIN tasks dep ON dep.id = d.depends_on_id
             WHERE d.task_id = ? AND d.dependency_type = 'blocks'
               AND dep.status NOT IN ('completed', 'skipped')",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(parse_blocker).collect()
    }

    /// Blocking predecessors of a task that are already terminal.
    pub async fn satisfied_blockers(&self, id: &TaskId) -> CoreResult<Vec<BlockingPredecessor>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT dep.id, dep.name, dep.status
             FROM task_dependencies d
             INNER JOIN tasks dep ON dep.id = d.depends_on_id
             WHERE d.task_id = ? AND d.dependency_type = 'blocks'
               AND dep.status IN ('completed', 'skipped')",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(parse_blocker).collect()
    }

    /// Returnable tasks: pending (or failed when `include_failed`),
    /// unclaimed, with every blocking predecessor terminal. Ordered by
    /// `(workflow_id, sequence, name)`.
    pub async fn list_available(
        &self,
        workflow_id: Option<&WorkflowId>,
        include_failed: bool,
        limit: u32,
    ) -> CoreResult<Vec<Task>> {
        let statuses = if include_failed {
            "('pending', 'failed')"
        } else {
            "('pending')"
        };
        let mut query = format!(
            "SELECT t.* FROM tasks t
             WHERE t.status IN {statuses} AND t.assigned_agent_id IS NULL
               AND NOT EXISTS (
                   SELECT 1 FROM task_dependencies d
                   INNER JOIN tasks dep ON dep.id = d.depends_on_id
                   WHERE d.task_id = t.id AND d.dependency_type = 'blocks'
                     AND dep.status NOT IN ('completed', 'skipped'))"
        );
        if workflow_id.is_some() {
            query.push_str(" AND t.workflow_id = ?");
        }
        query.push_str(" ORDER BY t.workflow_id, t.sequence, t.name LIMIT ?");

        let mut q = sqlx::query_as::<_, TaskRow>(&query);
        if let Some(wf) = workflow_id {
            q = q.bind(wf.as_str().to_string());
        }
        q = q.bind(i64::from(limit));

        let rows: Vec<TaskRow> = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(Task::try_from).collect()
    }

    /// Sibling task ids sharing a parallel group within a workflow.
    pub async fn parallel_siblings(
        &self,
        workflow_id: &WorkflowId,
        group: &str,
        exclude: &TaskId,
    ) -> CoreResult<Vec<TaskId>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT id FROM tasks WHERE workflow_id = ? AND parallel_group = ? AND id != ?
             ORDER BY sequence",
        )
        .bind(workflow_id.as_str())
        .bind(group)
        .bind(exclude.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|(id,)| super::parse_id(&id)).collect()
    }

    pub async fn counts_by_status(
        &self,
        workflow_id: &WorkflowId,
    ) -> CoreResult<HashMap<TaskStatus, u64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM tasks WHERE workflow_id = ? GROUP BY status",
        )
        .bind(workflow_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut counts = HashMap::new();
        for (status, count) in rows {
            if let Some(status) = TaskStatus::from_str(&status) {
                counts.insert(status, count as u64);
            }
        }
        Ok(counts)
    }

    /// Atomic claim: at most one agent ever wins a task. Claiming a task
    /// already held by the same agent succeeds idempotently. The winning
    /// claim and the agent's busy transition commit together.
    pub async fn claim(&self, id: &TaskId, agent_id: &AgentId) -> CoreResult<ClaimOutcome> {
        let mut tx = self.pool.begin().await?;

        let now = clock::now_ms();
        let result = sqlx::query(
            "UPDATE tasks SET assigned_agent_id = ?, claimed_at = ?, updated_at = ?
             WHERE id = ? AND assigned_agent_id IS NULL
               AND status NOT IN ('completed', 'skipped')",
        )
        .bind(agent_id.as_str())
        .bind(now)
        .bind(now)
        .bind(id.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let row: Option<(String, Option<String>)> =
                sqlx::query_as("SELECT status, assigned_agent_id FROM tasks WHERE id = ?")
                    .bind(id.as_str())
                    .fetch_optional(&mut *tx)
                    .await?;
            let (status, holder) = row.ok_or_else(|| CoreError::not_found("task", id.as_str()))?;
            return match holder {
                Some(holder) if holder == agent_id.as_str() => Ok(ClaimOutcome::Claimed),
                Some(holder) => Ok(ClaimOutcome::AlreadyClaimedBy(super::parse_id(&holder)?)),
                None => Err(CoreError::PreconditionFailed(format!(
                    "task {id} is {status} and cannot be claimed"
                ))),
            };
        }

        sqlx::query(
            "UPDATE agents SET status = 'busy', current_task_id = ?, updated_at = ? WHERE id = ?",
        )
        .bind(id.as_str())
        .bind(now)
        .bind(agent_id.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ClaimOutcome::Claimed)
    }

    /// Release a claim held by `agent_id`. The claim clear and the agent's
    /// return to `online` commit together.
    pub async fn release(&self, id: &TaskId, agent_id: &AgentId) -> CoreResult<ReleaseOutcome> {
        let mut tx = self.pool.begin().await?;

        let now = clock::now_ms();
        let result = sqlx::query(
            "UPDATE tasks SET assigned_agent_id = NULL, claimed_at = NULL, updated_at = ?
             WHERE id = ? AND assigned_agent_id = ?",
        )
        .bind(now)
        .bind(id.as_str())
        .bind(agent_id.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            // Distinguish a missing task from a claim mismatch.
            let exists: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM tasks WHERE id = ?")
                .bind(id.as_str())
                .fetch_optional(&mut *tx)
                .await?;
            if exists.is_none() {
                return Err(CoreError::not_found("task", id.as_str()));
            }
            return Ok(ReleaseOutcome::NotClaimed);
        }

        sqlx::query(
            "UPDATE agents SET status = 'online', current_task_id = NULL, updated_at = ?
             WHERE id = ?",
        )
        .bind(now)
        .bind(agent_id.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ReleaseOutcome::Released)
    }

    /// Terminal path for a finished spawn: append the terminal checkpoint,
    /// write the task's final status and outcome, clear the claim, and free
    /// the agent, all in one transaction.
    pub async fn finish(
        &self,
        id: &TaskId,
        agent_id: &AgentId,
        status: TaskStatus,
        outcome: Option<&str>,
        error: Option<&str>,
        files_changed: Option<&[String]>,
    ) -> CoreResult<()> {
        debug_assert!(matches!(status, TaskStatus::Completed | TaskStatus::Failed));
        let mut tx = self.pool.begin().await?;
        let now = clock::now_ms();

        let (checkpoint_type, summary) = match status {
            TaskStatus::Completed => (CheckpointType::Complete, outcome.unwrap_or("completed")),
            _ => (CheckpointType::Error, error.unwrap_or("failed")),
        };
        let next_seq: (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(sequence), 0) + 1 FROM checkpoints WHERE task_id = ?")
                .bind(id.as_str())
                .fetch_one(&mut *tx)
                .await?;
        sqlx::query(
            "INSERT INTO checkpoints (id, task_id, sequence, checkpoint_type, summary,
             detail, files_changed, created_at) VALUES (?, ?, ?, ?, ?, NULL, ?, ?)",
        )
        .bind(CheckpointId::new().as_str().to_string())
        .bind(id.as_str())
        .bind(next_seq.0)
        .bind(checkpoint_type.as_str())
        .bind(summary)
        .bind(files_changed.map(serde_json::to_string).transpose()?)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            "UPDATE tasks SET status = ?, outcome = ?, outcome_detail = ?,
             assigned_agent_id = NULL, claimed_at = NULL, updated_at = ?
             WHERE id = ? AND assigned_agent_id = ?",
        )
        .bind(status.as_str())
        .bind(outcome)
        .bind(error)
        .bind(now)
        .bind(id.as_str())
        .bind(agent_id.as_str())
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::PreconditionFailed(format!(
                "task {id} is not claimed by agent {agent_id}"
            )));
        }

        sqlx::query(
            "UPDATE agents SET status = 'online', current_task_id = NULL, updated_at = ?
             WHERE id = ?",
        )
        .bind(now)
        .bind(agent_id.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Replan: replace the plan, clear prior outcomes, return the task to
    /// `pending`, and append a `replan` checkpoint whose summary is the
    /// reason. One transaction.
    pub async fn replan(
        &self,
        id: &TaskId,
        reason: &str,
        new_plan: &serde_json::Value,
    ) -> CoreResult<Checkpoint> {
        let mut tx = self.pool.begin().await?;
        let now = clock::now_ms();

        let result = sqlx::query(
            "UPDATE tasks SET plan = ?, outcome = NULL, outcome_detail = NULL,
             status = 'pending', updated_at = ? WHERE id = ?",
        )
        .bind(serde_json::to_string(new_plan)?)
        .bind(now)
        .bind(id.as_str())
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("task", id.as_str()));
        }

        let next_seq: (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(sequence), 0) + 1 FROM checkpoints WHERE task_id = ?")
                .bind(id.as_str())
                .fetch_one(&mut *tx)
                .await?;
        let mut checkpoint = Checkpoint::new(
            id.clone(),
            next_seq.0.max(1) as u32,
            CheckpointType::Replan,
            reason,
        );
        checkpoint.created_at = clock::from_ms(now);
        sqlx::query(
            "INSERT INTO checkpoints (id, task_id, sequence, checkpoint_type, summary,
             detail, files_changed, created_at) VALUES (?, ?, ?, ?, ?, NULL, NULL, ?)",
        )
        .bind(checkpoint.id.as_str())
        .bind(id.as_str())
        .bind(i64::from(checkpoint.sequence))
        .bind(checkpoint.checkpoint_type.as_str())
        .bind(&checkpoint.summary)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(checkpoint)
    }
}

fn parse_dependency(row: (String, String, String)) -> CoreResult<TaskDependency> {
    let (task_id, depends_on_id, dependency_type) = row;
    Ok(TaskDependency {
        task_id: super::parse_id(&task_id)?,
        depends_on_id: super::parse_id(&depends_on_id)?,
        dependency_type: DependencyType::from_str(&dependency_type).ok_or_else(|| {
            CoreError::Serialization(format!("invalid dependency type: {dependency_type}"))
        })?,
    })
}

fn parse_blocker(row: (String, String, String)) -> CoreResult<BlockingPredecessor> {
    let (id, name, status) = row;
    Ok(BlockingPredecessor {
        id: super::parse_id(&id)?,
        name,
        status: TaskStatus::from_str(&status)
            .ok_or_else(|| CoreError::Serialization(format!("invalid task status: {status}")))?,
    })
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    workflow_id: String,
    name: String,
    description: Option<String>,
    status: String,
    sequence: i64,
    parallel_group: Option<String>,
    plan: Option<String>,
    plan_summary: Option<String>,
    context: Option<String>,
    context_from: Option<String>,
    outcome: Option<String>,
    outcome_detail: Option<String>,
    workspace_id: Option<String>,
    repository_id: Option<String>,
    assigned_agent_id: Option<String>,
    claimed_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<TaskRow> for Task {
    type Error = CoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status = TaskStatus::from_str(&row.status).ok_or_else(|| {
            CoreError::Serialization(format!("invalid task status: {}", row.status))
        })?;
        Ok(Task {
            id: super::parse_id(&row.id)?,
            workflow_id: super::parse_id(&row.workflow_id)?,
            name: row.name,
            description: row.description,
            status,
            sequence: row.sequence.max(0) as u32,
            parallel_group: row.parallel_group,
            plan: super::parse_json_opt(row.plan)?,
            plan_summary: row.plan_summary,
            context: super::parse_json_opt(row.context)?,
            context_from: super::parse_json_opt(row.context_from)?,
            outcome: row.outcome,
            outcome_detail: row.outcome_detail,
            workspace_id: super::parse_optional_id(row.workspace_id)?,
            repository_id: super::parse_optional_id(row.repository_id)?,
            assigned_agent_id: super::parse_optional_id(row.assigned_agent_id)?,
            claimed_at: super::from_ms_opt(row.claimed_at),
            created_at: super::from_ms(row.created_at),
            updated_at: super::from_ms(row.updated_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{
        create_migrated_test_pool, SqliteAgentRepository, SqliteWorkflowRepository,
    };
    use crate::domain::models::{Agent, Workflow};

    struct Fixture {
        tasks: SqliteTaskRepository,
        agents: SqliteAgentRepository,
        workflows: SqliteWorkflowRepository,
        workflow: Workflow,
    }

    async fn setup() -> Fixture {
        let pool = create_migrated_test_pool().await.unwrap();
        let workflows = SqliteWorkflowRepository::new(pool.clone());
        let workflow = Workflow::new("fixture");
        workflows.create(&workflow).await.unwrap();
        Fixture {
            tasks: SqliteTaskRepository::new(pool.clone()),
            agents: SqliteAgentRepository::new(pool),
            workflows,
            workflow,
        }
    }

    async fn seed_task(fx: &Fixture, name: &str, seq: u32) -> Task {
        let task = Task::new(fx.workflow.id.clone(), name, seq);
        fx.workflows.append_task(&task, &[]).await.unwrap();
        task
    }

    #[tokio::test]
    async fn test_claim_is_atomic_and_idempotent() {
        let fx = setup().await;
        let task = seed_task(&fx, "claim-me", 1).await;
        let a1 = Agent::new("a1", "test");
        let a2 = Agent::new("a2", "test");
        fx.agents.create(&a1).await.unwrap();
        fx.agents.create(&a2).await.unwrap();

        assert_eq!(
            fx.tasks.claim(&task.id, &a1.id).await.unwrap(),
            ClaimOutcome::Claimed
        );
        // Idempotent for the same agent
        assert_eq!(
            fx.tasks.claim(&task.id, &a1.id).await.unwrap(),
            ClaimOutcome::Claimed
        );
        // Contender loses and learns the holder
        assert_eq!(
            fx.tasks.claim(&task.id, &a2.id).await.unwrap(),
            ClaimOutcome::AlreadyClaimedBy(a1.id.clone())
        );

        let agent = fx.agents.get(&a1.id).await.unwrap().unwrap();
        assert_eq!(agent.current_task_id, Some(task.id.clone()));
    }

    #[tokio::test]
    async fn test_claim_rejects_terminal_task() {
        let fx = setup().await;
        let mut task = seed_task(&fx, "done", 1).await;
        task.status = TaskStatus::Completed;
        task.outcome = Some("ok".to_string());
        fx.tasks.update(&task).await.unwrap();

        let agent = Agent::new("a", "test");
        fx.agents.create(&agent).await.unwrap();
        assert!(matches!(
            fx.tasks.claim(&task.id, &agent.id).await,
            Err(CoreError::PreconditionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_release_then_release_again() {
        let fx = setup().await;
        let task = seed_task(&fx, "held", 1).await;
        let agent = Agent::new("a", "test");
        fx.agents.create(&agent).await.unwrap();

        fx.tasks.claim(&task.id, &agent.id).await.unwrap();
        assert_eq!(
            fx.tasks.release(&task.id, &agent.id).await.unwrap(),
            ReleaseOutcome::Released
        );
        assert_eq!(
            fx.tasks.release(&task.id, &agent.id).await.unwrap(),
            ReleaseOutcome::NotClaimed
        );
    }

    #[tokio::test]
    async fn test_list_available_respects_blocking_edges() {
        let fx = setup().await;
        let first = seed_task(&fx, "first", 1).await;
        let second = seed_task(&fx, "second", 2).await;
        fx.tasks
            .add_dependency(&TaskDependency {
                task_id: second.id.clone(),
                depends_on_id: first.id.clone(),
                dependency_type: DependencyType::Blocks,
            })
            .await
            .unwrap();

        let available = fx
            .tasks
            .list_available(Some(&fx.workflow.id), false, 10)
            .await
            .unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].id, first.id);

        // Complete the blocker; the dependent becomes available
        let mut first = fx.tasks.require(&first.id).await.unwrap();
        first.status = TaskStatus::Completed;
        first.outcome = Some("ok".to_string());
        fx.tasks.update(&first).await.unwrap();

        let available = fx
            .tasks
            .list_available(Some(&fx.workflow.id), false, 10)
            .await
            .unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].id, second.id);
    }

    #[tokio::test]
    async fn test_informs_edges_do_not_block() {
        let fx = setup().await;
        let first = seed_task(&fx, "research", 1).await;
        let second = seed_task(&fx, "build", 2).await;
        fx.tasks
            .add_dependency(&TaskDependency {
                task_id: second.id.clone(),
                depends_on_id: first.id.clone(),
                dependency_type: DependencyType::Informs,
            })
            .await
            .unwrap();

        let available = fx
            .tasks
            .list_available(Some(&fx.workflow.id), false, 10)
            .await
            .unwrap();
        assert_eq!(available.len(), 2);
    }

    #[tokio::test]
    async fn test_skipped_dependency_counts_as_satisfied() {
        let fx = setup().await;
        let first = seed_task(&fx, "optional", 1).await;
        let second = seed_task(&fx, "after", 2).await;
        fx.tasks
            .add_dependency(&TaskDependency {
                task_id: second.id.clone(),
                depends_on_id: first.id.clone(),
                dependency_type: DependencyType::Blocks,
            })
            .await
            .unwrap();

        let mut first = fx.tasks.require(&first.id).await.unwrap();
        first.status = TaskStatus::Skipped;
        fx.tasks.update(&first).await.unwrap();

        assert!(fx.tasks.unsatisfied_blockers(&second.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_finish_writes_checkpoint_and_clears_claim() {
        let fx = setup().await;
        let task = seed_task(&fx, "work", 1).await;
        let agent = Agent::new("a", "test");
        fx.agents.create(&agent).await.unwrap();
        fx.tasks.claim(&task.id, &agent.id).await.unwrap();

        let mut claimed = fx.tasks.require(&task.id).await.unwrap();
        claimed.status = TaskStatus::InProgress;
        fx.tasks.update(&claimed).await.unwrap();

        fx.tasks
            .finish(
                &task.id,
                &agent.id,
                TaskStatus::Completed,
                Some("shipped"),
                None,
                Some(&["src/main.rs".to_string()]),
            )
            .await
            .unwrap();

        let finished = fx.tasks.require(&task.id).await.unwrap();
        assert_eq!(finished.status, TaskStatus::Completed);
        assert_eq!(finished.outcome.as_deref(), Some("shipped"));
        assert!(finished.assigned_agent_id.is_none());

        let agent = fx.agents.get(&agent.id).await.unwrap().unwrap();
        assert!(agent.current_task_id.is_none());
    }

    #[tokio::test]
    async fn test_replan_resets_and_records_checkpoint() {
        let fx = setup().await;
        let mut task = seed_task(&fx, "flaky", 1).await;
        task.status = TaskStatus::Failed;
        task.outcome_detail = Some("flaky".to_string());
        fx.tasks.update(&task).await.unwrap();

        let checkpoint = fx
            .tasks
            .replan(&task.id, "retry", &serde_json::json!({"steps": ["again"]}))
            .await
            .unwrap();
        assert_eq!(checkpoint.checkpoint_type, CheckpointType::Replan);
        assert_eq!(checkpoint.summary, "retry");
        assert_eq!(checkpoint.sequence, 1);

        let replanned = fx.tasks.require(&task.id).await.unwrap();
        assert_eq!(replanned.status, TaskStatus::Pending);
        assert!(replanned.outcome.is_none());
        assert!(replanned.outcome_detail.is_none());
    }
}
