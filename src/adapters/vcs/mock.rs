//! Scripted `Vcs` mock for tests.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::errors::CoreResult;
use crate::domain::models::Workspace;
use crate::domain::ports::{PrStatus, RebaseOutcome, Vcs, WorktreeRequest};

/// Mutable script and call log for the mock.
#[derive(Debug, Default)]
pub struct MockVcsState {
    /// Whether `check_status` reports the PR mergeable
    pub mergeable: bool,
    /// Conflicts reported while not mergeable
    pub conflict_files: Vec<String>,
    /// Whether the next rebase comes back clean
    pub rebase_clean: bool,
    /// Worktree paths created
    pub created_worktrees: Vec<String>,
    /// Worktree paths abandoned
    pub abandoned_worktrees: Vec<String>,
    /// Branches merged
    pub merged_branches: Vec<String>,
    /// How many times a PR was opened or refreshed
    pub pr_refreshes: u32,
    /// How many rebases ran
    pub rebases: u32,
}

#[derive(Clone, Default)]
pub struct MockVcs {
    state: Arc<RwLock<MockVcsState>>,
}

impl MockVcs {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock whose PR is immediately mergeable.
    pub fn mergeable() -> Self {
        let state = MockVcsState {
            mergeable: true,
            ..Default::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub async fn set_mergeable(&self, mergeable: bool) {
        self.state.write().await.mergeable = mergeable;
    }

    pub async fn set_conflicts(&self, files: Vec<String>, rebase_resolves: bool) {
        let mut state = self.state.write().await;
        state.mergeable = false;
        state.conflict_files = files;
        state.rebase_clean = rebase_resolves;
    }

    pub async fn state(&self) -> tokio::sync::RwLockReadGuard<'_, MockVcsState> {
        self.state.read().await
    }
}

#[async_trait]
impl Vcs for MockVcs {
    async fn create_worktree(&self, request: &WorktreeRequest) -> CoreResult<()> {
        self.state
            .write()
            .await
            .created_worktrees
            .push(request.workspace_path.clone());
        Ok(())
    }

    async fn abandon_worktree(&self, workspace_path: &str) -> CoreResult<()> {
        self.state
            .write()
            .await
            .abandoned_worktrees
            .push(workspace_path.to_string());
        Ok(())
    }

    async fn open_or_refresh_pr(&self, workspace: &Workspace) -> CoreResult<String> {
        let mut state = self.state.write().await;
        state.pr_refreshes += 1;
        Ok(format!("https://example.test/pr/{}", workspace.branch))
    }

    async fn check_status(&self, workspace: &Workspace) -> CoreResult<PrStatus> {
        let state = self.state.read().await;
        Ok(PrStatus {
            url: workspace.pr_url.clone(),
            mergeable: state.mergeable,
            conflict_files: state.conflict_files.clone(),
        })
    }

    async fn rebase(&self, _workspace: &Workspace) -> CoreResult<RebaseOutcome> {
        let mut state = self.state.write().await;
        state.rebases += 1;
        if state.rebase_clean {
            // A clean rebase clears the conflicts and makes the PR mergeable.
            state.mergeable = true;
            state.conflict_files.clear();
            Ok(RebaseOutcome {
                clean: true,
                conflict_files: Vec::new(),
            })
        } else {
            Ok(RebaseOutcome {
                clean: false,
                conflict_files: state.conflict_files.clone(),
            })
        }
    }

    async fn merge(&self, workspace: &Workspace) -> CoreResult<String> {
        self.state
            .write()
            .await
            .merged_branches
            .push(workspace.branch.clone());
        Ok(format!("mock-sha-{}", workspace.branch))
    }
}
