//! Git-backed implementation of the `Vcs` port.
//!
//! Worktree and rebase mechanics shell out to `git`; pull-request operations
//! shell out to `gh`. Every command runs against the workspace or repository
//! path it targets, never the process working directory.

use async_trait::async_trait;
use tokio::process::Command;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::Workspace;
use crate::domain::ports::{PrStatus, RebaseOutcome, Vcs, WorktreeRequest};

pub struct GitVcs;

impl GitVcs {
    pub fn new() -> Self {
        Self
    }

    async fn run(program: &str, args: &[&str], cwd: Option<&str>) -> CoreResult<String> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        let output = cmd
            .output()
            .await
            .map_err(|e| CoreError::Storage(format!("failed to run {program}: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CoreError::Storage(format!(
                "{program} {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn conflict_files(workspace_path: &str) -> Vec<String> {
        match Self::run(
            "git",
            &["diff", "--name-only", "--diff-filter=U"],
            Some(workspace_path),
        )
        .await
        {
            Ok(out) if !out.is_empty() => out.lines().map(str::to_string).collect(),
            _ => Vec::new(),
        }
    }
}

impl Default for GitVcs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Vcs for GitVcs {
    async fn create_worktree(&self, request: &WorktreeRequest) -> CoreResult<()> {
        let mut args = vec![
            "worktree",
            "add",
            "-b",
            request.branch.as_str(),
            request.workspace_path.as_str(),
        ];
        if let Some(base) = &request.base_branch {
            args.push(base);
        }
        Self::run("git", &args, Some(&request.repo_path)).await?;
        tracing::info!(
            branch = %request.branch,
            path = %request.workspace_path,
            "created worktree"
        );
        Ok(())
    }

    async fn abandon_worktree(&self, workspace_path: &str) -> CoreResult<()> {
        Self::run("git", &["worktree", "remove", "--force", workspace_path], None).await?;
        tracing::info!(path = %workspace_path, "removed worktree");
        Ok(())
    }

    async fn open_or_refresh_pr(&self, workspace: &Workspace) -> CoreResult<String> {
        // An existing PR for the branch wins; otherwise open one.
        let existing = Self::run(
            "gh",
            &["pr", "view", workspace.branch.as_str(), "--json", "url", "--jq", ".url"],
            Some(&workspace.path),
        )
        .await;
        if let Ok(url) = existing {
            if !url.is_empty() {
                return Ok(url);
            }
        }
        Self::run(
            "gh",
            &["pr", "create", "--fill", "--head", workspace.branch.as_str()],
            Some(&workspace.path),
        )
        .await
    }

    async fn check_status(&self, workspace: &Workspace) -> CoreResult<PrStatus> {
        let mergeable = Self::run(
            "gh",
            &[
                "pr",
                "view",
                workspace.branch.as_str(),
                "--json",
                "mergeable",
                "--jq",
                ".mergeable",
            ],
            Some(&workspace.path),
        )
        .await?;
        let mergeable = mergeable.eq_ignore_ascii_case("mergeable");
        let conflict_files = if mergeable {
            Vec::new()
        } else {
            Self::conflict_files(&workspace.path).await
        };
        Ok(PrStatus {
            url: workspace.pr_url.clone(),
            mergeable,
            conflict_files,
        })
    }

    async fn rebase(&self, workspace: &Workspace) -> CoreResult<RebaseOutcome> {
        let base = workspace.base_branch.as_deref().unwrap_or("main");
        match Self::run("git", &["rebase", base], Some(&workspace.path)).await {
            Ok(_) => Ok(RebaseOutcome {
                clean: true,
                conflict_files: Vec::new(),
            }),
            Err(_) => {
                let conflict_files = Self::conflict_files(&workspace.path).await;
                // Leave the tree usable for the next attempt.
                let _ = Self::run("git", &["rebase", "--abort"], Some(&workspace.path)).await;
                Ok(RebaseOutcome {
                    clean: false,
                    conflict_files,
                })
            }
        }
    }

    async fn merge(&self, workspace: &Workspace) -> CoreResult<String> {
        Self::run(
            "gh",
            &["pr", "merge", workspace.branch.as_str(), "--squash"],
            Some(&workspace.path),
        )
        .await?;
        let base = workspace.base_branch.as_deref().unwrap_or("main");
        Self::run("git", &["rev-parse", base], Some(&workspace.path)).await
    }
}
