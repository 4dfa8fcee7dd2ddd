//! CLI command handlers.

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use std::sync::Arc;

use crate::adapters::spawner::CommandSpawner;
use crate::adapters::sqlite::{self, WorkflowFilter};
use crate::adapters::vcs::GitVcs;
use crate::domain::ids::WorkflowId;
use crate::domain::models::{CawConfig, CycleMode, WorkflowStatus};
use crate::infrastructure::config::{self, CliOverrides, ConfigLoader};
use crate::services::{
    RegisterSession, RunnerPoolConfig, RunnerRegistry, SessionService, WorkflowService,
};

use super::display;

#[derive(Debug, Subcommand)]
pub enum WorkflowCommand {
    /// List workflows, optionally by status
    List {
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one workflow with its tasks
    Show { workflow_id: String },
}

#[derive(Debug, Subcommand)]
pub enum TaskCommand {
    /// List the tasks of a workflow in sequence order
    List { workflow_id: String },
}

#[derive(Debug, Subcommand)]
pub enum SessionCommand {
    /// List registered sessions
    List,
}

pub async fn init(overrides: &CliOverrides) -> Result<()> {
    let config = ConfigLoader::load(overrides)?;
    let config_path = std::path::Path::new(config::CONFIG_FILE);
    if !config_path.exists() {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("creating .caw directory")?;
        }
        let rendered = serde_json::to_string_pretty(&config)?;
        std::fs::write(config_path, rendered).context("writing .caw/config.json")?;
        println!("wrote {}", config_path.display());
    }

    let url = config::database_url(&config);
    sqlite::initialize_database(&url)
        .await
        .context("initializing database")?;
    println!("database ready at {}", config::database_path(&config).display());
    Ok(())
}

pub async fn workflow(command: WorkflowCommand, config: &CawConfig) -> Result<()> {
    let pool = open(config).await?;
    let service = WorkflowService::new(pool);

    match command {
        WorkflowCommand::List { status } => {
            let status = status
                .as_deref()
                .map(|s| {
                    WorkflowStatus::from_str(s)
                        .ok_or_else(|| anyhow::anyhow!("unknown workflow status: {s}"))
                })
                .transpose()?;
            let workflows = service
                .list(&WorkflowFilter {
                    status,
                    ..Default::default()
                })
                .await?;
            println!("{}", display::workflows_table(&workflows));
        }
        WorkflowCommand::Show { workflow_id } => {
            let id = parse_workflow_id(&workflow_id)?;
            let (workflow, tasks) = service.get_with_tasks(&id).await?;
            println!("{} — {}", workflow.id, workflow.name);
            println!("status: {}", workflow.status.as_str());
            if let Some(summary) = &workflow.plan_summary {
                println!("plan: {summary}");
            }
            println!("{}", display::tasks_table(&tasks));
        }
    }
    Ok(())
}

pub async fn task(command: TaskCommand, config: &CawConfig) -> Result<()> {
    let pool = open(config).await?;
    match command {
        TaskCommand::List { workflow_id } => {
            let id = parse_workflow_id(&workflow_id)?;
            let (_, tasks) = WorkflowService::new(pool).get_with_tasks(&id).await?;
            println!("{}", display::tasks_table(&tasks));
        }
    }
    Ok(())
}

pub async fn session(command: SessionCommand, config: &CawConfig) -> Result<()> {
    let pool = open(config).await?;
    match command {
        SessionCommand::List => {
            let sessions = SessionService::new(pool).list().await?;
            println!("{}", display::sessions_table(&sessions));
        }
    }
    Ok(())
}

/// Run one workflow's task graph in the foreground, with a session
/// registered for the duration and stale state reconciled up front.
pub async fn run(workflow_id: &str, cycle: Option<&str>, config: &CawConfig) -> Result<()> {
    let id = parse_workflow_id(workflow_id)?;
    let cli_cycle = cycle
        .map(|c| CycleMode::from_str(c).ok_or_else(|| anyhow::anyhow!("unknown cycle mode: {c}")))
        .transpose()?;

    let pool = open(config).await?;
    let sessions = SessionService::new(pool.clone());
    sessions.reconcile_at_startup().await?;
    let session = sessions
        .register(RegisterSession {
            pid: std::process::id(),
            ..Default::default()
        })
        .await?;

    let runner_config = RunnerPoolConfig {
        default_runtime: config.agent.runtime.clone(),
        cli_cycle_mode: cli_cycle,
        file_config: config.clone(),
        ..Default::default()
    };
    let registry = RunnerRegistry::new(
        pool,
        Arc::new(CommandSpawner::new()),
        Arc::new(GitVcs::new()),
        runner_config,
    );

    let result = registry.run_blocking(&id).await;
    sessions.deregister(&session.id).await.ok();

    match result {
        Ok(status) => {
            println!("workflow {id} finished: {}", status.as_str());
            Ok(())
        }
        Err(e) => bail!("workflow {id} failed: {e}"),
    }
}

async fn open(config: &CawConfig) -> Result<sqlx::SqlitePool> {
    let url = config::database_url(config);
    sqlite::initialize_database(&url)
        .await
        .context("opening database")
}

fn parse_workflow_id(raw: &str) -> Result<WorkflowId> {
    WorkflowId::parse(raw).map_err(|e| anyhow::anyhow!("{e}"))
}
