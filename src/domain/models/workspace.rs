//! Workspace domain model.
//!
//! A workspace is an isolated on-disk source-tree copy (a VCS worktree) that
//! one or more tasks mutate. Workspaces outlive their tasks and end up
//! merged or abandoned.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::clock;
use crate::domain::ids::{RepoId, WorkflowId, WorkspaceId};

/// Status of a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceStatus {
    /// In use by tasks
    Active,
    /// Branch merged into the base
    Merged,
    /// Discarded without merging
    Abandoned,
}

impl Default for WorkspaceStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl WorkspaceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Merged => "merged",
            Self::Abandoned => "abandoned",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "merged" => Some(Self::Merged),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Merged | Self::Abandoned)
    }
}

/// An isolated source-tree copy a task mutates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    /// Unique identifier
    pub id: WorkspaceId,
    /// Owning workflow
    pub workflow_id: WorkflowId,
    /// Source repository this workspace was carved from
    pub repository_id: Option<RepoId>,
    /// On-disk path
    pub path: String,
    /// Branch the workspace works on
    pub branch: String,
    /// Branch the workspace branched from
    pub base_branch: Option<String>,
    /// Current status
    pub status: WorkspaceStatus,
    /// Merge commit SHA once merged
    pub merge_commit: Option<String>,
    /// Pull-request URL once opened
    pub pr_url: Option<String>,
    /// Workspace-level policy overrides
    pub config: Option<Value>,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
}

impl Workspace {
    /// Create a new active workspace.
    pub fn new(
        workflow_id: WorkflowId,
        path: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        let now = clock::now();
        Self {
            id: WorkspaceId::new(),
            workflow_id,
            repository_id: None,
            path: path.into(),
            branch: branch.into(),
            base_branch: None,
            status: WorkspaceStatus::Active,
            merge_commit: None,
            pr_url: None,
            config: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the source repository.
    pub fn with_repository(mut self, repository_id: RepoId) -> Self {
        self.repository_id = Some(repository_id);
        self
    }

    /// Set the base branch.
    pub fn with_base_branch(mut self, base: impl Into<String>) -> Self {
        self.base_branch = Some(base.into());
        self
    }

    /// Generate a branch name for a task-scoped workspace.
    pub fn branch_name_for(workflow_id: &WorkflowId, task_name: &str) -> String {
        let slug: String = task_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        format!("caw/{}/{}", workflow_id.as_str(), slug.trim_matches('-'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_defaults() {
        let ws = Workspace::new(WorkflowId::new(), "/tmp/ws", "caw/feature");
        assert_eq!(ws.status, WorkspaceStatus::Active);
        assert!(ws.merge_commit.is_none());
    }

    #[test]
    fn test_branch_name_slug() {
        let wf = WorkflowId::new();
        let branch = Workspace::branch_name_for(&wf, "Add login flow!");
        assert!(branch.starts_with("caw/"));
        assert!(branch.ends_with("add-login-flow"));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            WorkspaceStatus::Active,
            WorkspaceStatus::Merged,
            WorkspaceStatus::Abandoned,
        ] {
            assert_eq!(WorkspaceStatus::from_str(status.as_str()), Some(status));
        }
    }
}
