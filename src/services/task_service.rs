//! Task service: guarded status transitions, task-level plans, replans,
//! claims, and readiness queries.

use serde_json::Value;
use sqlx::SqlitePool;

use crate::adapters::sqlite::{
    BlockingPredecessor, SqliteCheckpointRepository, SqliteTaskRepository,
};
use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::ids::{AgentId, TaskId, WorkflowId};
use crate::domain::models::{
    deep_merge, Checkpoint, ClaimOutcome, ReleaseOutcome, Task, TaskDependency, TaskStatus,
};

/// Both adjacency directions of a task's dependency edges.
#[derive(Debug, Clone, Default)]
pub struct TaskAdjacency {
    /// Edges this task points at (what it depends on)
    pub depends_on: Vec<TaskDependency>,
    /// Edges pointing at this task (who depends on it)
    pub dependents: Vec<TaskDependency>,
}

/// Dependency satisfaction snapshot.
#[derive(Debug, Clone, Default)]
pub struct DependencyCheck {
    pub satisfied: bool,
    pub completed: Vec<BlockingPredecessor>,
    pub pending: Vec<BlockingPredecessor>,
}

/// Extra fields accepted by `update_status`.
#[derive(Debug, Clone, Default)]
pub struct StatusChange {
    pub outcome: Option<String>,
    pub error: Option<String>,
}

/// A task with its checkpoint history attached.
#[derive(Debug, Clone)]
pub struct TaskWithCheckpoints {
    pub task: Task,
    pub checkpoints: Vec<Checkpoint>,
}

#[derive(Clone)]
pub struct TaskService {
    tasks: SqliteTaskRepository,
    checkpoints: SqliteCheckpointRepository,
}

impl TaskService {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            tasks: SqliteTaskRepository::new(pool.clone()),
            checkpoints: SqliteCheckpointRepository::new(pool),
        }
    }

    pub async fn get(&self, id: &TaskId) -> CoreResult<Task> {
        self.tasks.require(id).await
    }

    /// A task with its most recent checkpoints (all of them when `limit` is
    /// None).
    pub async fn get_with_checkpoints(
        &self,
        id: &TaskId,
        limit: Option<u32>,
    ) -> CoreResult<TaskWithCheckpoints> {
        let task = self.tasks.require(id).await?;
        let checkpoints = match limit {
            Some(limit) => self.checkpoints.list_recent(id, limit).await?,
            None => self.checkpoints.list_for_task(id).await?,
        };
        Ok(TaskWithCheckpoints { task, checkpoints })
    }

    /// Validated status transition. Moving out of `pending` requires
    /// satisfied dependencies, `completed` requires an outcome, `failed`
    /// requires an error (stored as `outcome_detail`).
    pub async fn update_status(
        &self,
        id: &TaskId,
        next: TaskStatus,
        change: StatusChange,
    ) -> CoreResult<Task> {
        let mut task = self.tasks.require(id).await?;
        if !task.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                entity: "task",
                from: task.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }

        match next {
            TaskStatus::Planning if task.status == TaskStatus::Pending => {
                if self.is_blocked(id).await? {
                    return Err(CoreError::PreconditionFailed(format!(
                        "task {id} has incomplete blocking dependencies"
                    )));
                }
            }
            TaskStatus::Completed => {
                let outcome = change.outcome.as_deref().unwrap_or("").trim();
                if outcome.is_empty() {
                    return Err(CoreError::PreconditionFailed(
                        "completing a task requires a non-empty outcome".to_string(),
                    ));
                }
            }
            TaskStatus::Failed => {
                let error = change.error.as_deref().unwrap_or("").trim();
                if error.is_empty() {
                    return Err(CoreError::PreconditionFailed(
                        "failing a task requires a non-empty error".to_string(),
                    ));
                }
            }
            _ => {}
        }

        task.status = next;
        if next == TaskStatus::Completed {
            task.outcome = change.outcome;
        }
        if next == TaskStatus::Failed {
            task.outcome_detail = change.error;
        }
        self.tasks.update(&task).await?;
        Ok(task)
    }

    /// Write the task-level plan. Legal only while the task is `planning`.
    /// `context` deep-merges into the existing context, preserving prior
    /// keys.
    pub async fn set_plan(
        &self,
        id: &TaskId,
        plan: Value,
        context: Option<&Value>,
    ) -> CoreResult<Task> {
        let mut task = self.tasks.require(id).await?;
        if task.status != TaskStatus::Planning {
            return Err(CoreError::PreconditionFailed(format!(
                "task {id} is {}; plans can only be set while planning",
                task.status.as_str()
            )));
        }
        task.plan = Some(plan);
        if let Some(patch) = context {
            let mut merged = task
                .context
                .take()
                .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
            deep_merge(&mut merged, patch);
            task.context = Some(merged);
        }
        self.tasks.update(&task).await?;
        Ok(task)
    }

    /// Replan a failed or in-flight task: new plan, cleared outcomes, back
    /// to `pending`, and a `replan` checkpoint recording the reason.
    pub async fn replan(
        &self,
        id: &TaskId,
        reason: &str,
        new_plan: &Value,
    ) -> CoreResult<Checkpoint> {
        let task = self.tasks.require(id).await?;
        if !matches!(task.status, TaskStatus::Failed | TaskStatus::InProgress) {
            return Err(CoreError::PreconditionFailed(format!(
                "task {id} is {}; replan is legal from failed or in_progress",
                task.status.as_str()
            )));
        }
        self.tasks.replan(id, reason, new_plan).await
    }

    /// Atomic claim; see `ClaimOutcome` for the race semantics.
    pub async fn claim(&self, id: &TaskId, agent_id: &AgentId) -> CoreResult<ClaimOutcome> {
        let outcome = self.tasks.claim(id, agent_id).await?;
        if outcome == ClaimOutcome::Claimed {
            tracing::debug!(task_id = %id, agent_id = %agent_id, "claimed task");
        }
        Ok(outcome)
    }

    /// Release a claim held by `agent_id`.
    pub async fn release(&self, id: &TaskId, agent_id: &AgentId) -> CoreResult<ReleaseOutcome> {
        self.tasks.release(id, agent_id).await
    }

    /// Pending, unclaimed, unblocked tasks ordered by `(workflow, sequence)`.
    pub async fn get_available(
        &self,
        workflow_id: Option<&WorkflowId>,
        limit: u32,
    ) -> CoreResult<Vec<Task>> {
        self.tasks.list_available(workflow_id, false, limit).await
    }

    /// True iff any blocking predecessor is not completed or skipped.
    pub async fn is_blocked(&self, id: &TaskId) -> CoreResult<bool> {
        Ok(!self.tasks.unsatisfied_blockers(id).await?.is_empty())
    }

    /// Dependency satisfaction breakdown for a task.
    pub async fn check_dependencies(&self, id: &TaskId) -> CoreResult<DependencyCheck> {
        let completed = self.tasks.satisfied_blockers(id).await?;
        let pending = self.tasks.unsatisfied_blockers(id).await?;
        Ok(DependencyCheck {
            satisfied: pending.is_empty(),
            completed,
            pending,
        })
    }

    /// Both adjacency directions of a task's edges.
    pub async fn get_dependencies(&self, id: &TaskId) -> CoreResult<TaskAdjacency> {
        Ok(TaskAdjacency {
            depends_on: self.tasks.dependencies_of(id).await?,
            dependents: self.tasks.dependents_of(id).await?,
        })
    }

    /// Append a progress checkpoint.
    pub async fn checkpoint(
        &self,
        id: &TaskId,
        checkpoint_type: crate::domain::models::CheckpointType,
        summary: &str,
        detail: Option<&Value>,
        files_changed: Option<&[String]>,
    ) -> CoreResult<Checkpoint> {
        self.tasks.require(id).await?;
        self.checkpoints
            .append(id, checkpoint_type, summary, detail, files_changed)
            .await
    }
}
