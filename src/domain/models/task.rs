//! Task domain model.
//!
//! Tasks are single units of work assignable to one agent. Within a workflow
//! they form a DAG over `blocks` dependency edges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::clock;
use crate::domain::ids::{AgentId, RepoId, TaskId, WorkflowId, WorkspaceId};

/// Status of a task in the execution pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created by plan admission, not yet started
    Pending,
    /// Advisory only: derived from incomplete blocking dependencies,
    /// never persisted
    Blocked,
    /// An agent is drafting the task-level plan
    Planning,
    /// An agent is executing the task
    InProgress,
    /// Execution suspended
    Paused,
    /// Finished with an outcome
    Completed,
    /// Finished with an error
    Failed,
    /// Deliberately not run; counts as done for dependents
    Skipped,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Blocked => "blocked",
            Self::Planning => "planning",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "blocked" => Some(Self::Blocked),
            "planning" => Some(Self::Planning),
            "in_progress" => Some(Self::InProgress),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// Check if this is a terminal state. Skipped satisfies dependents just
    /// like completed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }

    /// Valid transitions from this status. This table is the single place
    /// task transitions are decided; `Blocked` is derived and never written.
    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[Self::Planning],
            Self::Planning => &[Self::InProgress, Self::Completed, Self::Pending],
            Self::InProgress => &[Self::Paused, Self::Completed, Self::Failed, Self::Pending],
            Self::Paused => &[Self::InProgress, Self::Failed],
            Self::Failed => &[Self::Pending, Self::Skipped],
            Self::Blocked | Self::Completed | Self::Skipped => &[],
        }
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// Type of a dependency edge between two tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    /// Gates readiness: the dependent cannot start until the dependency is
    /// completed or skipped
    Blocks,
    /// Metadata only: the dependency's outcome is surfaced as context
    Informs,
}

impl Default for DependencyType {
    fn default() -> Self {
        Self::Blocks
    }
}

impl DependencyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blocks => "blocks",
            Self::Informs => "informs",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "blocks" => Some(Self::Blocks),
            "informs" => Some(Self::Informs),
            _ => None,
        }
    }
}

/// A dependency edge: `task_id` depends on `depends_on_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDependency {
    pub task_id: TaskId,
    pub depends_on_id: TaskId,
    pub dependency_type: DependencyType,
}

/// Result of a claim attempt. Losing the race is normal control flow, not an
/// error; claiming a task already held by the same agent is an idempotent
/// success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    AlreadyClaimedBy(AgentId),
}

/// Result of a release attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// The task was not claimed by the releasing agent
    NotClaimed,
}

/// A single unit of work assignable to one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: TaskId,
    /// Owning workflow
    pub workflow_id: WorkflowId,
    /// Name, unique within the plan
    pub name: String,
    /// Detailed description/prompt
    pub description: Option<String>,
    /// Current status
    pub status: TaskStatus,
    /// Position in the plan, 1-based and dense within the workflow
    pub sequence: u32,
    /// Label shared by tasks that may run concurrently
    pub parallel_group: Option<String>,
    /// Task-level plan written during the planning phase
    pub plan: Option<Value>,
    /// One-line plan summary
    pub plan_summary: Option<String>,
    /// Accumulated context, merged on write
    pub context: Option<Value>,
    /// Explicit list of prior tasks to draw context from
    pub context_from: Option<Vec<TaskId>>,
    /// Result summary; required for completed tasks
    pub outcome: Option<String>,
    /// Error detail; required for failed tasks
    pub outcome_detail: Option<String>,
    /// Workspace the task mutates
    pub workspace_id: Option<WorkspaceId>,
    /// Repository the task targets
    pub repository_id: Option<RepoId>,
    /// Agent currently holding the claim
    pub assigned_agent_id: Option<AgentId>,
    /// When the claim was taken
    pub claimed_at: Option<DateTime<Utc>>,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new pending task at the given sequence position.
    pub fn new(workflow_id: WorkflowId, name: impl Into<String>, sequence: u32) -> Self {
        let now = clock::now();
        Self {
            id: TaskId::new(),
            workflow_id,
            name: name.into(),
            description: None,
            status: TaskStatus::default(),
            sequence,
            parallel_group: None,
            plan: None,
            plan_summary: None,
            context: None,
            context_from: None,
            outcome: None,
            outcome_detail: None,
            workspace_id: None,
            repository_id: None,
            assigned_agent_id: None,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the parallel group label.
    pub fn with_parallel_group(mut self, group: impl Into<String>) -> Self {
        self.parallel_group = Some(group.into());
        self
    }

    /// Set the repository.
    pub fn with_repository(mut self, repository_id: RepoId) -> Self {
        self.repository_id = Some(repository_id);
        self
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        self.status.can_transition_to(next)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the task currently holds a claim.
    pub fn is_claimed(&self) -> bool {
        self.assigned_agent_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_defaults() {
        let task = Task::new(WorkflowId::new(), "build", 1);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.sequence, 1);
        assert!(!task.is_claimed());
    }

    #[test]
    fn test_happy_path_transitions() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Planning));
        assert!(TaskStatus::Planning.can_transition_to(TaskStatus::InProgress));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Completed));
    }

    #[test]
    fn test_replan_transitions() {
        // Both planning and in_progress can fall back to pending
        assert!(TaskStatus::Planning.can_transition_to(TaskStatus::Pending));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Pending));
        assert!(TaskStatus::Failed.can_transition_to(TaskStatus::Pending));
    }

    #[test]
    fn test_failure_paths() {
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Paused.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Failed.can_transition_to(TaskStatus::Skipped));
        // Pending tasks cannot fail directly
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Failed));
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        assert!(TaskStatus::Completed.valid_transitions().is_empty());
        assert!(TaskStatus::Skipped.valid_transitions().is_empty());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Skipped.is_terminal());
        assert!(!TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn test_blocked_is_never_a_source() {
        assert!(TaskStatus::Blocked.valid_transitions().is_empty());
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::InProgress));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Paused.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Pending));
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Blocked,
            TaskStatus::Planning,
            TaskStatus::InProgress,
            TaskStatus::Paused,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Skipped,
        ] {
            assert_eq!(TaskStatus::from_str(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_dependency_type_round_trip() {
        assert_eq!(DependencyType::from_str("blocks"), Some(DependencyType::Blocks));
        assert_eq!(DependencyType::from_str("informs"), Some(DependencyType::Informs));
        assert_eq!(DependencyType::from_str("unknown"), None);
    }
}
