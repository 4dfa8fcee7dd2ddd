//! Agent runner pool: one bounded pool per workflow.
//!
//! The pool polls the scheduler for returnable tasks, claims them, provisions
//! worktrees, assembles context, and spawns external agents, one slot per
//! claim. Each slot runs a stagnation monitor over the spawner's progress
//! stream and cancels the child on abort. When every task is terminal the
//! post-completion hook decides the workflow's final status.
//!
//! The parallelism bound is re-read from the workflow row on every poll, so
//! `set_parallelism` resizes live pools without a control channel.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinSet;

use crate::adapters::sqlite::{
    SqliteAgentRepository, SqliteRepoRepository, SqliteTaskRepository, SqliteWorkflowRepository,
    SqliteWorkspaceRepository,
};
use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::ids::{AgentId, WorkflowId};
use crate::domain::models::{
    Agent, AgentRole, CawConfig, ClaimOutcome, CycleMode, Task, TaskStatus, Workflow,
    WorkflowStatus, Workspace,
};
use crate::domain::ports::{
    AgentSpawner, SpawnOutcome, SpawnRequest, SpawnerConfig, Vcs, WorktreeRequest,
};
use crate::services::context_assembler::{ContextAssembler, ContextInclude};
use crate::services::pr_cycle::PrCycle;
use crate::services::scheduler::Scheduler;
use crate::services::stagnation::{StagnationConfig, StagnationLevel, StagnationMonitor};
use crate::services::task_service::{StatusChange, TaskService};

/// Error text recorded when the monitor kills an agent.
const STAGNATION_ABORT_ERROR: &str = "aborted by stagnation monitor";

/// Pool tuning.
#[derive(Debug, Clone)]
pub struct RunnerPoolConfig {
    /// Delay between scheduler polls
    pub poll_interval: Duration,
    /// Cadence of wall-clock stagnation checks between agent observations
    pub monitor_tick: Duration,
    pub stagnation: StagnationConfig,
    /// Runtime for slots when the workflow config does not name one
    pub default_runtime: String,
    /// Directory worktrees are provisioned under
    pub workspace_root: String,
    /// CLI-level cycle override, passed to the post-completion hook
    pub cli_cycle_mode: Option<CycleMode>,
    /// File-level config, lowest-precedence cycle source
    pub file_config: CawConfig,
}

impl Default for RunnerPoolConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            monitor_tick: Duration::from_secs(5),
            stagnation: StagnationConfig::default(),
            default_runtime: "claude".to_string(),
            workspace_root: ".caw/workspaces".to_string(),
            cli_cycle_mode: None,
            file_config: CawConfig::default(),
        }
    }
}

/// One pool driving one workflow.
pub struct RunnerPool {
    pool: sqlx::SqlitePool,
    workflow_id: WorkflowId,
    spawner: Arc<dyn AgentSpawner>,
    vcs: Arc<dyn Vcs>,
    config: RunnerPoolConfig,
    shutdown_tx: broadcast::Sender<()>,
    idle_agents: Arc<Mutex<Vec<AgentId>>>,
}

impl RunnerPool {
    pub fn new(
        pool: sqlx::SqlitePool,
        workflow_id: WorkflowId,
        spawner: Arc<dyn AgentSpawner>,
        vcs: Arc<dyn Vcs>,
        config: RunnerPoolConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(4);
        Self {
            pool,
            workflow_id,
            spawner,
            vcs,
            config,
            shutdown_tx,
            idle_agents: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A handle that stops the pool from elsewhere.
    pub fn stop_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Ask the pool to stop; `run` cancels every slot and returns once they
    /// are down.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Drive the workflow until every task is terminal (returning the final
    /// workflow status) or the pool is stopped (returning the status as of
    /// the stop).
    pub async fn run(&self) -> CoreResult<WorkflowStatus> {
        let workflows = SqliteWorkflowRepository::new(self.pool.clone());
        let scheduler = Scheduler::new(self.pool.clone());
        let pr_cycle = PrCycle::new(self.pool.clone(), self.vcs.clone(), self.spawner.clone());

        let mut slots: JoinSet<()> = JoinSet::new();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut started = false;

        tracing::info!(workflow_id = %self.workflow_id, "runner pool started");

        loop {
            while slots.try_join_next().is_some() {}

            if shutdown_rx.try_recv().is_ok() {
                return self.drain(&workflows, &mut slots).await;
            }

            let workflow = workflows.require(&self.workflow_id).await?;
            match workflow.status {
                WorkflowStatus::Paused => {
                    tokio::time::sleep(self.config.poll_interval).await;
                    continue;
                }
                WorkflowStatus::Completed
                | WorkflowStatus::Abandoned
                | WorkflowStatus::Failed
                | WorkflowStatus::AwaitingMerge => {
                    return self.drain(&workflows, &mut slots).await;
                }
                _ => {}
            }

            let next = scheduler.next_tasks(&self.workflow_id, false).await?;

            if next.all_complete && slots.is_empty() {
                let spawner_config = resolve_spawner_config(&workflow, &self.config);
                let target = pr_cycle
                    .on_tasks_complete(
                        &workflow,
                        self.config.cli_cycle_mode,
                        &self.config.file_config,
                        &spawner_config,
                    )
                    .await?
                    .unwrap_or(WorkflowStatus::Completed);
                self.finish_workflow(&workflows, &workflow, target).await?;
                tracing::info!(workflow_id = %self.workflow_id, status = target.as_str(), "runner pool finished");
                return Ok(target);
            }

            let capacity = workflow.max_parallel_tasks as usize;
            for scheduled in next.tasks {
                if slots.len() >= capacity {
                    break;
                }
                let agent_id = self.checkout_agent(&workflow).await?;
                let claim = TaskService::new(self.pool.clone())
                    .claim(&scheduled.task.id, &agent_id)
                    .await;
                match claim {
                    Ok(ClaimOutcome::Claimed) => {
                        if !started {
                            self.mark_started(&workflows, &workflow).await?;
                            started = true;
                        }
                        self.spawn_slot(&mut slots, workflow.clone(), scheduled.task, agent_id);
                    }
                    Ok(ClaimOutcome::AlreadyClaimedBy(_)) => {
                        self.idle_agents.lock().await.push(agent_id);
                    }
                    Err(e) => {
                        tracing::warn!(task_id = %scheduled.task.id, error = %e, "claim failed");
                        self.idle_agents.lock().await.push(agent_id);
                    }
                }
            }

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    return self.drain(&workflows, &mut slots).await;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                Some(_) = slots.join_next(), if !slots.is_empty() => {}
            }
        }
    }

    /// Stop every slot and report the workflow's current status.
    async fn drain(
        &self,
        workflows: &SqliteWorkflowRepository,
        slots: &mut JoinSet<()>,
    ) -> CoreResult<WorkflowStatus> {
        let _ = self.shutdown_tx.send(());
        while slots.join_next().await.is_some() {}
        let workflow = workflows.require(&self.workflow_id).await?;
        tracing::info!(workflow_id = %self.workflow_id, status = workflow.status.as_str(), "runner pool stopped");
        Ok(workflow.status)
    }

    /// First claim moves a ready workflow into `in_progress`.
    async fn mark_started(
        &self,
        workflows: &SqliteWorkflowRepository,
        workflow: &Workflow,
    ) -> CoreResult<()> {
        if workflow.status.can_transition_to(WorkflowStatus::InProgress) {
            workflows
                .set_status(&self.workflow_id, WorkflowStatus::InProgress)
                .await?;
        }
        Ok(())
    }

    /// Transition the workflow to the hook's target status, stepping through
    /// `in_progress` when the direct edge does not exist.
    async fn finish_workflow(
        &self,
        workflows: &SqliteWorkflowRepository,
        workflow: &Workflow,
        target: WorkflowStatus,
    ) -> CoreResult<()> {
        if workflow.status == target {
            return Ok(());
        }
        if workflow.status.can_transition_to(target) {
            return workflows.set_status(&self.workflow_id, target).await;
        }
        if workflow.status.can_transition_to(WorkflowStatus::InProgress)
            && WorkflowStatus::InProgress.can_transition_to(target)
        {
            workflows
                .set_status(&self.workflow_id, WorkflowStatus::InProgress)
                .await?;
            return workflows.set_status(&self.workflow_id, target).await;
        }
        Err(CoreError::InvalidTransition {
            entity: "workflow",
            from: workflow.status.as_str().to_string(),
            to: target.as_str().to_string(),
        })
    }

    /// Reuse an idle slot agent or register a fresh one.
    async fn checkout_agent(&self, workflow: &Workflow) -> CoreResult<AgentId> {
        if let Some(agent_id) = self.idle_agents.lock().await.pop() {
            return Ok(agent_id);
        }
        let agents = SqliteAgentRepository::new(self.pool.clone());
        let index = {
            let registered: Vec<Agent> = agents
                .list(&crate::adapters::sqlite::AgentFilter::default())
                .await?;
            registered
                .iter()
                .filter(|a| a.workflow_id.as_ref() == Some(&self.workflow_id))
                .count()
        };
        let agent = Agent::new(
            format!("runner-{index}"),
            resolve_spawner_config(workflow, &self.config).command,
        )
        .with_role(AgentRole::Worker)
        .with_workflow(self.workflow_id.clone());
        agents.create(&agent).await?;
        Ok(agent.id)
    }

    fn spawn_slot(
        &self,
        slots: &mut JoinSet<()>,
        workflow: Workflow,
        task: Task,
        agent_id: AgentId,
    ) {
        let ctx = SlotContext {
            pool: self.pool.clone(),
            spawner: self.spawner.clone(),
            vcs: self.vcs.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown_tx.subscribe(),
            idle_agents: self.idle_agents.clone(),
        };
        slots.spawn(async move {
            let task_id = task.id.clone();
            let agent = agent_id.clone();
            if let Err(e) = run_slot(ctx, workflow, task, agent_id).await {
                tracing::error!(task_id = %task_id, agent_id = %agent, error = %e, "slot failed");
            }
        });
    }
}

struct SlotContext {
    pool: sqlx::SqlitePool,
    spawner: Arc<dyn AgentSpawner>,
    vcs: Arc<dyn Vcs>,
    config: RunnerPoolConfig,
    shutdown: broadcast::Receiver<()>,
    idle_agents: Arc<Mutex<Vec<AgentId>>>,
}

/// One slot: drive one claimed task through planning, spawn, monitoring,
/// and the terminal transaction.
async fn run_slot(
    mut ctx: SlotContext,
    workflow: Workflow,
    mut task: Task,
    agent_id: AgentId,
) -> CoreResult<()> {
    let tasks = TaskService::new(ctx.pool.clone());
    let task_repo = SqliteTaskRepository::new(ctx.pool.clone());

    tasks
        .update_status(&task.id, TaskStatus::Planning, StatusChange::default())
        .await?;
    tasks
        .update_status(&task.id, TaskStatus::InProgress, StatusChange::default())
        .await?;

    let workspace = provision_workspace(&ctx, &workflow, &mut task).await?;

    let assembler = ContextAssembler::new(ctx.pool.clone());
    let context = assembler
        .load_task_context(&task.id, ContextInclude::default(), None)
        .await?;

    let request = SpawnRequest {
        workflow_id: workflow.id.clone(),
        task_id: task.id.clone(),
        workspace_path: workspace.as_ref().map(|ws| ws.path.clone()),
        context: serde_json::to_value(&context)?,
        spawner_config: resolve_spawner_config(&workflow, &ctx.config),
    };

    let (progress_tx, mut progress_rx) = mpsc::channel(64);
    let (cancel_tx, cancel_rx) = broadcast::channel(1);
    let mut monitor = StagnationMonitor::new(ctx.config.stagnation.clone());
    let mut ticker = tokio::time::interval(ctx.config.monitor_tick);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let spawner = ctx.spawner.clone();
    let mut run_fut = Box::pin(spawner.run(request, progress_tx, cancel_rx));

    let mut aborted = false;
    let mut last_turns = 0u32;
    let mut progress_open = true;
    let outcome = loop {
        tokio::select! {
            result = &mut run_fut => break result,
            observation = progress_rx.recv(), if progress_open => {
                match observation {
                    Some(observation) => {
                        last_turns = observation.turns;
                        let level = monitor.check(observation.turns, &observation.fingerprint);
                        if level == StagnationLevel::Abort && !aborted {
                            aborted = true;
                            let _ = cancel_tx.send(());
                        }
                    }
                    None => progress_open = false,
                }
            }
            _ = ticker.tick() => {
                if monitor.check_elapsed(last_turns) == StagnationLevel::Abort && !aborted {
                    aborted = true;
                    let _ = cancel_tx.send(());
                }
            }
            _ = ctx.shutdown.recv() => {
                let _ = cancel_tx.send(());
            }
        }
    };

    // Terminal transaction: checkpoint + status + claim release together.
    match outcome {
        _ if aborted => {
            task_repo
                .finish(
                    &task.id,
                    &agent_id,
                    TaskStatus::Failed,
                    None,
                    Some(STAGNATION_ABORT_ERROR),
                    None,
                )
                .await?;
        }
        Ok(SpawnOutcome::Completed { outcome, artifacts }) => {
            task_repo
                .finish(
                    &task.id,
                    &agent_id,
                    TaskStatus::Completed,
                    Some(&outcome),
                    None,
                    Some(&artifacts),
                )
                .await?;
        }
        Ok(SpawnOutcome::Failed { error }) => {
            task_repo
                .finish(&task.id, &agent_id, TaskStatus::Failed, None, Some(&error), None)
                .await?;
        }
        Err(e) => {
            task_repo
                .finish(
                    &task.id,
                    &agent_id,
                    TaskStatus::Failed,
                    None,
                    Some(&e.to_string()),
                    None,
                )
                .await?;
        }
    }

    ctx.idle_agents.lock().await.push(agent_id);
    Ok(())
}

/// Provision a worktree for the task when the workflow asks for one and a
/// source repository is resolvable.
async fn provision_workspace(
    ctx: &SlotContext,
    workflow: &Workflow,
    task: &mut Task,
) -> CoreResult<Option<Workspace>> {
    let workspaces = SqliteWorkspaceRepository::new(ctx.pool.clone());
    if let Some(workspace_id) = &task.workspace_id {
        return workspaces.get(workspace_id).await;
    }
    if !workflow.auto_create_workspaces {
        return Ok(None);
    }

    let repos = SqliteRepoRepository::new(ctx.pool.clone());
    let workflows = SqliteWorkflowRepository::new(ctx.pool.clone());
    let repo = match &task.repository_id {
        Some(repo_id) => repos.get(repo_id).await?,
        None => {
            let linked = workflows.linked_repository_ids(&workflow.id).await?;
            match linked.first() {
                Some(repo_id) => repos.get(repo_id).await?,
                None => None,
            }
        }
    };
    let Some(repo) = repo else {
        tracing::debug!(task_id = %task.id, "no repository resolvable; skipping worktree");
        return Ok(None);
    };

    let slug: String = task
        .name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let path = format!(
        "{}/{}/{}",
        ctx.config.workspace_root,
        workflow.id.as_str(),
        slug.trim_matches('-')
    );
    let branch = Workspace::branch_name_for(&workflow.id, &task.name);

    ctx.vcs
        .create_worktree(&WorktreeRequest {
            repo_path: repo.path.clone(),
            workspace_path: path.clone(),
            branch: branch.clone(),
            base_branch: None,
        })
        .await?;

    let workspace = Workspace::new(workflow.id.clone(), path, branch).with_repository(repo.id);
    workspaces.create(&workspace).await?;

    task.workspace_id = Some(workspace.id.clone());
    SqliteTaskRepository::new(ctx.pool.clone()).update(task).await?;
    Ok(Some(workspace))
}

/// Spawner invocation settings: the workflow's `spawner_config` blob when
/// present, otherwise the pool's default runtime.
fn resolve_spawner_config(workflow: &Workflow, config: &RunnerPoolConfig) -> SpawnerConfig {
    workflow
        .config
        .get("spawner_config")
        .and_then(|value| serde_json::from_value(value.clone()).ok())
        .unwrap_or_else(|| SpawnerConfig::for_runtime(config.default_runtime.clone()))
}
