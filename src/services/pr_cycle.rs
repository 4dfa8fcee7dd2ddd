//! Cycle-mode resolution and the pull-request integration cycle.
//!
//! Once a workflow's tasks all finish, the resolved cycle mode decides what
//! happens: `auto` drives rebase and merge to completion through the VCS
//! collaborator, `hitl` parks the workflow at `awaiting_merge` for a human,
//! `off` leaves integration alone.

use serde_json::Value;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use crate::adapters::sqlite::SqliteWorkspaceRepository;
use crate::domain::errors::CoreResult;
use crate::domain::models::{
    CawConfig, CycleMode, Workflow, WorkflowStatus, Workspace, WorkspaceStatus,
};
use crate::domain::ports::{AgentSpawner, SpawnRequest, SpawnerConfig, Vcs};

/// Rebase-agent invocations before the cycle gives up.
const MAX_REBASE_ATTEMPTS: u32 = 3;

/// Read a `{"pr": {"cycle": "..."}}` setting out of a config blob.
fn cycle_from_blob(config: &Value) -> Option<CycleMode> {
    config
        .get("pr")
        .and_then(|pr| pr.get("cycle"))
        .and_then(Value::as_str)
        .and_then(CycleMode::from_str)
}

/// Resolve the effective cycle mode with fixed precedence:
/// CLI > workspace config > workflow config > file config > `hitl`.
pub fn resolve_cycle_mode(
    cli: Option<CycleMode>,
    workspace: Option<&Workspace>,
    workflow: Option<&Workflow>,
    file_config: Option<&CawConfig>,
) -> CycleMode {
    cli.or_else(|| workspace.and_then(|ws| ws.config.as_ref().and_then(cycle_from_blob)))
        .or_else(|| workflow.and_then(|wf| cycle_from_blob(&wf.config)))
        .map_or_else(
            || file_config.map_or(CycleMode::default(), |cfg| cfg.pr.cycle),
            |mode| mode,
        )
}

/// Drives the post-completion integration cycle.
#[derive(Clone)]
pub struct PrCycle {
    vcs: Arc<dyn Vcs>,
    spawner: Arc<dyn AgentSpawner>,
    workspaces: SqliteWorkspaceRepository,
}

impl PrCycle {
    pub fn new(pool: SqlitePool, vcs: Arc<dyn Vcs>, spawner: Arc<dyn AgentSpawner>) -> Self {
        Self {
            vcs,
            spawner,
            workspaces: SqliteWorkspaceRepository::new(pool),
        }
    }

    /// Hook invoked when every task of a workflow is terminal. Returns the
    /// status the workflow should transition to, or `None` to let the
    /// caller finish it as `completed`.
    pub async fn on_tasks_complete(
        &self,
        workflow: &Workflow,
        cli_mode: Option<CycleMode>,
        file_config: &CawConfig,
        spawner_config: &SpawnerConfig,
    ) -> CoreResult<Option<WorkflowStatus>> {
        let workspace = self.active_workspace(workflow).await?;
        let mode = resolve_cycle_mode(
            cli_mode,
            workspace.as_ref(),
            Some(workflow),
            Some(file_config),
        );
        tracing::info!(workflow_id = %workflow.id, mode = mode.as_str(), "post-completion cycle");

        match mode {
            CycleMode::Off => Ok(None),
            CycleMode::Hitl => Ok(Some(WorkflowStatus::AwaitingMerge)),
            CycleMode::Auto => {
                let Some(workspace) = workspace else {
                    // Nothing to integrate; the workflow just completes.
                    return Ok(None);
                };
                match self.run_auto_cycle(workflow, workspace, spawner_config).await {
                    Ok(()) => Ok(Some(WorkflowStatus::Completed)),
                    Err(e) => {
                        tracing::error!(workflow_id = %workflow.id, error = %e, "auto merge cycle failed");
                        Ok(Some(WorkflowStatus::Failed))
                    }
                }
            }
        }
    }

    /// The auto cycle: refresh the PR, check mergeability, run a rebase
    /// agent while conflicts remain, then merge.
    async fn run_auto_cycle(
        &self,
        workflow: &Workflow,
        mut workspace: Workspace,
        spawner_config: &SpawnerConfig,
    ) -> CoreResult<()> {
        let url = self.vcs.open_or_refresh_pr(&workspace).await?;
        self.workspaces.set_pr_url(&workspace.id, &url).await?;
        workspace.pr_url = Some(url);

        for attempt in 1..=MAX_REBASE_ATTEMPTS {
            let status = self.vcs.check_status(&workspace).await?;
            if status.mergeable {
                let sha = self.vcs.merge(&workspace).await?;
                self.workspaces
                    .set_status(&workspace.id, WorkspaceStatus::Merged, Some(&sha))
                    .await?;
                tracing::info!(workspace_id = %workspace.id, sha = %sha, "merged");
                return Ok(());
            }

            tracing::info!(
                workspace_id = %workspace.id,
                attempt,
                conflicts = status.conflict_files.len(),
                "conflicts present, dispatching rebase agent"
            );
            self.run_rebase_agent(workflow, &workspace, &status.conflict_files, spawner_config)
                .await;

            let rebase = self.vcs.rebase(&workspace).await?;
            if !rebase.clean && attempt == MAX_REBASE_ATTEMPTS {
                return Err(crate::domain::errors::CoreError::PreconditionFailed(
                    format!(
                        "conflicts unresolved after {MAX_REBASE_ATTEMPTS} rebase attempts: {}",
                        rebase.conflict_files.join(", ")
                    ),
                ));
            }
        }

        // Attempts exhausted without reaching a mergeable state.
        Err(crate::domain::errors::CoreError::PreconditionFailed(
            "merge cycle did not converge".to_string(),
        ))
    }

    /// A short-lived re-invocation of the spawner targeted at conflict
    /// resolution. Its failure is not fatal; the rebase result decides.
    async fn run_rebase_agent(
        &self,
        workflow: &Workflow,
        workspace: &Workspace,
        conflict_files: &[String],
        spawner_config: &SpawnerConfig,
    ) {
        let context = serde_json::json!({
            "objective": "resolve merge conflicts and leave the tree rebase-clean",
            "branch": workspace.branch,
            "base_branch": workspace.base_branch,
            "conflict_files": conflict_files,
        });
        let request = SpawnRequest {
            workflow_id: workflow.id.clone(),
            task_id: crate::domain::ids::TaskId::new(),
            workspace_path: Some(workspace.path.clone()),
            context,
            spawner_config: spawner_config.clone(),
        };
        let (progress_tx, mut progress_rx) = mpsc::channel(16);
        let (_cancel_tx, cancel_rx) = broadcast::channel(1);
        tokio::spawn(async move { while progress_rx.recv().await.is_some() {} });

        if let Err(e) = self.spawner.run(request, progress_tx, cancel_rx).await {
            tracing::warn!(error = %e, "rebase agent failed");
        }
    }

    /// The workspace the cycle operates on: the most recent active one.
    async fn active_workspace(&self, workflow: &Workflow) -> CoreResult<Option<Workspace>> {
        let mut workspaces = self.workspaces.list_by_workflow(&workflow.id).await?;
        workspaces.retain(|ws| ws.status == WorkspaceStatus::Active);
        Ok(workspaces.pop())
    }
}
