//! Version-control capability consumed by the core.
//!
//! The core records workspace lifecycle transitions; the actual worktree,
//! rebase, and merge mechanics belong to the implementation behind this
//! trait.

use async_trait::async_trait;

use crate::domain::errors::CoreResult;
use crate::domain::models::Workspace;

/// Parameters for provisioning an isolated worktree.
#[derive(Debug, Clone)]
pub struct WorktreeRequest {
    /// Repository to carve the worktree from
    pub repo_path: String,
    /// Where the worktree should live on disk
    pub workspace_path: String,
    /// Branch to create for the worktree
    pub branch: String,
    /// Branch to start from; implementation default when None
    pub base_branch: Option<String>,
}

/// Mergeability snapshot of a workspace's pull request.
#[derive(Debug, Clone, Default)]
pub struct PrStatus {
    /// PR URL if one exists
    pub url: Option<String>,
    /// Whether the PR can merge cleanly right now
    pub mergeable: bool,
    /// Files in conflict when not mergeable
    pub conflict_files: Vec<String>,
}

/// Result of a rebase attempt.
#[derive(Debug, Clone)]
pub struct RebaseOutcome {
    /// Whether the rebase applied cleanly
    pub clean: bool,
    /// Files left in conflict otherwise
    pub conflict_files: Vec<String>,
}

/// Version-control operations the core delegates.
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Create an isolated worktree with its own branch.
    async fn create_worktree(&self, request: &WorktreeRequest) -> CoreResult<()>;

    /// Tear down a worktree without merging.
    async fn abandon_worktree(&self, workspace_path: &str) -> CoreResult<()>;

    /// Open a pull request for the workspace branch, or refresh an existing
    /// one. Returns the PR URL.
    async fn open_or_refresh_pr(&self, workspace: &Workspace) -> CoreResult<String>;

    /// Query the mergeability of the workspace's PR.
    async fn check_status(&self, workspace: &Workspace) -> CoreResult<PrStatus>;

    /// Rebase the workspace branch onto its base.
    async fn rebase(&self, workspace: &Workspace) -> CoreResult<RebaseOutcome>;

    /// Merge the workspace branch. Returns the merge commit SHA.
    async fn merge(&self, workspace: &Workspace) -> CoreResult<String>;
}
