//! Workflow domain model.
//!
//! A workflow is a user-level unit of work (one prompt or issue) that
//! produces a plan and a dependency-ordered task graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::clock;
use crate::domain::ids::{SessionId, WorkflowId};

/// Status of a workflow through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created, no plan admitted yet
    Planning,
    /// Plan admitted, tasks waiting to run
    Ready,
    /// At least one task is being worked
    InProgress,
    /// Execution suspended by the user
    Paused,
    /// All tasks finished and integrated
    Completed,
    /// Execution gave up
    Failed,
    /// Work complete, merge waiting on a human
    AwaitingMerge,
    /// Discarded without finishing
    Abandoned,
}

impl Default for WorkflowStatus {
    fn default() -> Self {
        Self::Planning
    }
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::AwaitingMerge => "awaiting_merge",
            Self::Abandoned => "abandoned",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "planning" => Some(Self::Planning),
            "ready" => Some(Self::Ready),
            "in_progress" => Some(Self::InProgress),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "awaiting_merge" => Some(Self::AwaitingMerge),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned)
    }

    /// Valid transitions from this status. This table is the single place
    /// workflow transitions are decided.
    pub fn valid_transitions(&self) -> &'static [WorkflowStatus] {
        match self {
            Self::Planning => &[Self::Ready, Self::Abandoned],
            Self::Ready => &[Self::InProgress, Self::Abandoned],
            Self::InProgress => &[
                Self::Paused,
                Self::Completed,
                Self::Failed,
                Self::AwaitingMerge,
                Self::Abandoned,
            ],
            Self::Paused => &[Self::InProgress, Self::Abandoned],
            Self::Failed => &[Self::InProgress, Self::Abandoned],
            Self::AwaitingMerge => &[Self::InProgress, Self::Completed, Self::Failed],
            Self::Completed | Self::Abandoned => &[],
        }
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// Where a workflow originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// A free-form user prompt
    Prompt,
    /// An issue-tracker reference
    Issue,
    /// Instantiated from a stored plan template
    Template,
    /// Assembled by hand through the front-end
    Manual,
}

impl Default for SourceType {
    fn default() -> Self {
        Self::Prompt
    }
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prompt => "prompt",
            Self::Issue => "issue",
            Self::Template => "template",
            Self::Manual => "manual",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "prompt" => Some(Self::Prompt),
            "issue" => Some(Self::Issue),
            "template" => Some(Self::Template),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// Result of a lock attempt. Losing the race is normal control flow, not an
/// error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    /// The caller holds the lock (fresh or re-entrant)
    Acquired,
    /// Another session holds it
    HeldBy(SessionId),
}

/// A user-level unit of work producing a plan and a task graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique identifier
    pub id: WorkflowId,
    /// Human-readable name
    pub name: String,
    /// Where this workflow came from
    pub source_type: SourceType,
    /// Reference into the source (issue number, template name)
    pub source_ref: Option<String>,
    /// Raw source content (prompt text, issue body)
    pub source_content: Option<String>,
    /// Current status
    pub status: WorkflowStatus,
    /// The plan as originally admitted
    pub initial_plan: Option<Value>,
    /// One-line plan summary
    pub plan_summary: Option<String>,
    /// Upper bound on concurrently running tasks
    pub max_parallel_tasks: u32,
    /// Whether the runner provisions a worktree per task
    pub auto_create_workspaces: bool,
    /// Per-workflow policy blob (pr.cycle, spawner_config, ...)
    pub config: Value,
    /// Session holding the single-writer lock, if any
    pub locked_by_session_id: Option<SessionId>,
    /// When the lock was taken
    pub locked_at: Option<DateTime<Utc>>,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Create a new workflow in `Planning`.
    pub fn new(name: impl Into<String>) -> Self {
        let now = clock::now();
        Self {
            id: WorkflowId::new(),
            name: name.into(),
            source_type: SourceType::default(),
            source_ref: None,
            source_content: None,
            status: WorkflowStatus::default(),
            initial_plan: None,
            plan_summary: None,
            max_parallel_tasks: 1,
            auto_create_workspaces: false,
            config: Value::Object(serde_json::Map::new()),
            locked_by_session_id: None,
            locked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the source.
    pub fn with_source(
        mut self,
        source_type: SourceType,
        source_ref: Option<String>,
        source_content: Option<String>,
    ) -> Self {
        self.source_type = source_type;
        self.source_ref = source_ref;
        self.source_content = source_content;
        self
    }

    /// Set the parallelism bound.
    pub fn with_max_parallel_tasks(mut self, n: u32) -> Self {
        self.max_parallel_tasks = n.max(1);
        self
    }

    /// Enable per-task workspace provisioning.
    pub fn with_auto_workspaces(mut self, enabled: bool) -> Self {
        self.auto_create_workspaces = enabled;
        self
    }

    /// Set the config blob.
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        self.status.can_transition_to(next)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_workflow_starts_planning() {
        let wf = Workflow::new("Ship feature");
        assert_eq!(wf.status, WorkflowStatus::Planning);
        assert_eq!(wf.max_parallel_tasks, 1);
        assert!(!wf.auto_create_workspaces);
    }

    #[test]
    fn test_happy_path_transitions() {
        assert!(WorkflowStatus::Planning.can_transition_to(WorkflowStatus::Ready));
        assert!(WorkflowStatus::Ready.can_transition_to(WorkflowStatus::InProgress));
        assert!(WorkflowStatus::InProgress.can_transition_to(WorkflowStatus::Completed));
        assert!(WorkflowStatus::InProgress.can_transition_to(WorkflowStatus::AwaitingMerge));
        assert!(WorkflowStatus::AwaitingMerge.can_transition_to(WorkflowStatus::Completed));
    }

    #[test]
    fn test_pause_resume_and_retry() {
        assert!(WorkflowStatus::InProgress.can_transition_to(WorkflowStatus::Paused));
        assert!(WorkflowStatus::Paused.can_transition_to(WorkflowStatus::InProgress));
        assert!(WorkflowStatus::Failed.can_transition_to(WorkflowStatus::InProgress));
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        assert!(WorkflowStatus::Completed.valid_transitions().is_empty());
        assert!(WorkflowStatus::Abandoned.valid_transitions().is_empty());
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Abandoned.is_terminal());
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!WorkflowStatus::Planning.can_transition_to(WorkflowStatus::InProgress));
        assert!(!WorkflowStatus::Ready.can_transition_to(WorkflowStatus::Completed));
        assert!(!WorkflowStatus::Paused.can_transition_to(WorkflowStatus::Completed));
        assert!(!WorkflowStatus::AwaitingMerge.can_transition_to(WorkflowStatus::Abandoned));
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            WorkflowStatus::Planning,
            WorkflowStatus::Ready,
            WorkflowStatus::InProgress,
            WorkflowStatus::Paused,
            WorkflowStatus::Completed,
            WorkflowStatus::Failed,
            WorkflowStatus::AwaitingMerge,
            WorkflowStatus::Abandoned,
        ] {
            assert_eq!(WorkflowStatus::from_str(status.as_str()), Some(status));
        }
    }
}
