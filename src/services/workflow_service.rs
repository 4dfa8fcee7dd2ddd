//! Workflow service: creation, plan admission, status transitions, task
//! appends/removals, and per-workflow policy.

use serde_json::Value;
use sqlx::SqlitePool;

use crate::adapters::sqlite::{
    SqliteRepoRepository, SqliteTaskRepository, SqliteTemplateRepository,
    SqliteWorkflowRepository, WorkflowFilter,
};
use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::ids::{TaskId, WorkflowId};
use crate::domain::models::{
    deep_merge, DependencyType, SourceType, Task, TaskDependency, Workflow, WorkflowStatus,
};
use crate::services::plan_graph::{self, PlanInput};

/// Parameters for creating a workflow.
#[derive(Debug, Clone, Default)]
pub struct CreateWorkflow {
    pub name: String,
    pub source_type: Option<SourceType>,
    pub source_ref: Option<String>,
    pub source_content: Option<String>,
    /// Repository paths to link, registering unknown ones on the fly
    pub repository_paths: Vec<String>,
    pub max_parallel_tasks: Option<u32>,
    pub auto_create_workspaces: bool,
    pub config: Option<Value>,
}

/// What plan admission created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanAdmission {
    pub tasks_created: usize,
    pub dependencies_created: usize,
}

/// What a task removal did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRemoval {
    pub removed_task_id: TaskId,
    pub dependencies_rewired: u64,
}

#[derive(Clone)]
pub struct WorkflowService {
    workflows: SqliteWorkflowRepository,
    tasks: SqliteTaskRepository,
    repos: SqliteRepoRepository,
    templates: SqliteTemplateRepository,
}

impl WorkflowService {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            workflows: SqliteWorkflowRepository::new(pool.clone()),
            tasks: SqliteTaskRepository::new(pool.clone()),
            repos: SqliteRepoRepository::new(pool.clone()),
            templates: SqliteTemplateRepository::new(pool),
        }
    }

    /// Create a workflow in `planning`, linking (and registering) its
    /// repositories.
    pub async fn create(&self, params: CreateWorkflow) -> CoreResult<Workflow> {
        if params.name.trim().is_empty() {
            return Err(CoreError::PreconditionFailed(
                "workflow name cannot be empty".to_string(),
            ));
        }
        let mut workflow = Workflow::new(params.name).with_source(
            params.source_type.unwrap_or_default(),
            params.source_ref,
            params.source_content,
        );
        if let Some(n) = params.max_parallel_tasks {
            workflow = workflow.with_max_parallel_tasks(n);
        }
        workflow = workflow.with_auto_workspaces(params.auto_create_workspaces);
        if let Some(config) = params.config {
            workflow = workflow.with_config(config);
        }

        self.workflows.create(&workflow).await?;
        for path in &params.repository_paths {
            let repo = self.repos.ensure(path).await?;
            self.workflows.link_repository(&workflow.id, &repo.id).await?;
        }

        tracing::info!(workflow_id = %workflow.id, name = %workflow.name, "created workflow");
        Ok(workflow)
    }

    /// Create a workflow from a stored template and admit the template's
    /// plan in one go.
    pub async fn create_from_template(
        &self,
        template_name: &str,
        workflow_name: &str,
    ) -> CoreResult<Workflow> {
        let template = self
            .templates
            .get_by_name(template_name)
            .await?
            .ok_or_else(|| CoreError::not_found("template", template_name))?;
        let plan: PlanInput = serde_json::from_value(template.template.clone())
            .map_err(|e| CoreError::InvalidPlan(format!("template {template_name}: {e}")))?;

        let workflow = self
            .create(CreateWorkflow {
                name: workflow_name.to_string(),
                source_type: Some(SourceType::Template),
                source_ref: Some(template.name.clone()),
                ..Default::default()
            })
            .await?;
        self.set_plan(&workflow.id, plan).await?;
        self.workflows.require(&workflow.id).await
    }

    /// Admit a plan: replace any prior tasks, resolve name references into
    /// `blocks` edges, and move the workflow to `ready` when non-empty.
    /// Rejected inputs leave the workflow untouched.
    pub async fn set_plan(&self, id: &WorkflowId, plan: PlanInput) -> CoreResult<PlanAdmission> {
        let workflow = self.workflows.require(id).await?;
        if workflow.status != WorkflowStatus::Planning {
            return Err(CoreError::PreconditionFailed(format!(
                "workflow {id} is {}; plans can only be set while planning",
                workflow.status.as_str()
            )));
        }

        let index = plan_graph::validate(&plan)?;

        let mut tasks = Vec::with_capacity(plan.tasks.len());
        for (i, input) in plan.tasks.iter().enumerate() {
            let mut task = Task::new(id.clone(), input.name.clone(), (i + 1) as u32);
            task.description = input.description.clone();
            task.parallel_group = input.parallel_group.clone();
            task.plan = input.plan.clone();
            tasks.push(task);
        }

        let mut dependencies = Vec::new();
        for (i, input) in plan.tasks.iter().enumerate() {
            for dep_name in &input.depends_on {
                let dep_index = index[dep_name];
                dependencies.push(TaskDependency {
                    task_id: tasks[i].id.clone(),
                    depends_on_id: tasks[dep_index].id.clone(),
                    dependency_type: DependencyType::Blocks,
                });
            }
        }

        let next_status = if tasks.is_empty() {
            WorkflowStatus::Planning
        } else {
            WorkflowStatus::Ready
        };
        let initial_plan = serde_json::to_value(&plan)?;
        self.workflows
            .replace_plan(
                id,
                plan.summary.as_deref(),
                &initial_plan,
                &tasks,
                &dependencies,
                next_status,
            )
            .await?;

        tracing::info!(
            workflow_id = %id,
            tasks = tasks.len(),
            dependencies = dependencies.len(),
            "admitted plan"
        );
        Ok(PlanAdmission {
            tasks_created: tasks.len(),
            dependencies_created: dependencies.len(),
        })
    }

    /// Validated status transition.
    pub async fn update_status(&self, id: &WorkflowId, next: WorkflowStatus) -> CoreResult<()> {
        let workflow = self.workflows.require(id).await?;
        if !workflow.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                entity: "workflow",
                from: workflow.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        if next == WorkflowStatus::Ready {
            let tasks = self.tasks.list_by_workflow(id).await?;
            if tasks.is_empty() {
                return Err(CoreError::PreconditionFailed(format!(
                    "workflow {id} has no tasks and cannot become ready"
                )));
            }
        }
        self.workflows.set_status(id, next).await
    }

    /// Append a task at the end of the plan. Legal while the workflow is
    /// planning, ready, or in progress.
    pub async fn add_task(
        &self,
        id: &WorkflowId,
        name: &str,
        depends_on: &[String],
        parallel_group: Option<&str>,
    ) -> CoreResult<Task> {
        let workflow = self.workflows.require(id).await?;
        if !matches!(
            workflow.status,
            WorkflowStatus::Planning | WorkflowStatus::Ready | WorkflowStatus::InProgress
        ) {
            return Err(CoreError::PreconditionFailed(format!(
                "cannot add tasks to a {} workflow",
                workflow.status.as_str()
            )));
        }
        if self.tasks.get_by_name(id, name).await?.is_some() {
            return Err(CoreError::InvalidPlan(format!("duplicate task name: {name}")));
        }

        let sequence = self.tasks.max_sequence(id).await? + 1;
        let mut task = Task::new(id.clone(), name, sequence);
        if let Some(group) = parallel_group {
            task.parallel_group = Some(group.to_string());
        }

        let mut dependencies = Vec::with_capacity(depends_on.len());
        for dep_name in depends_on {
            let dep = self
                .tasks
                .get_by_name(id, dep_name)
                .await?
                .ok_or_else(|| {
                    CoreError::InvalidPlan(format!("unknown dependency task: {dep_name}"))
                })?;
            dependencies.push(TaskDependency {
                task_id: task.id.clone(),
                depends_on_id: dep.id,
                dependency_type: DependencyType::Blocks,
            });
        }

        self.workflows.append_task(&task, &dependencies).await?;
        Ok(task)
    }

    /// Remove a pending or skipped task, rewiring dependencies so every
    /// predecessor stays an ancestor of every successor.
    pub async fn remove_task(&self, id: &WorkflowId, task_id: &TaskId) -> CoreResult<TaskRemoval> {
        let rewired = self.workflows.remove_task_rewired(id, task_id).await?;
        Ok(TaskRemoval {
            removed_task_id: task_id.clone(),
            dependencies_rewired: rewired,
        })
    }

    /// Set the parallelism bound (minimum 1). Live pools re-read the bound
    /// on their next poll.
    pub async fn set_parallelism(&self, id: &WorkflowId, max_parallel: u32) -> CoreResult<()> {
        if max_parallel == 0 {
            return Err(CoreError::PreconditionFailed(
                "max_parallel_tasks must be at least 1".to_string(),
            ));
        }
        self.workflows.set_parallelism(id, max_parallel).await
    }

    /// Deep-merge a partial config into the workflow's config blob.
    pub async fn patch_config(&self, id: &WorkflowId, partial: &Value) -> CoreResult<Workflow> {
        let mut workflow = self.workflows.require(id).await?;
        deep_merge(&mut workflow.config, partial);
        self.workflows.set_config(id, &workflow.config).await?;
        self.workflows.require(id).await
    }

    pub async fn get(&self, id: &WorkflowId) -> CoreResult<Workflow> {
        self.workflows.require(id).await
    }

    /// A workflow together with its tasks ordered by sequence.
    pub async fn get_with_tasks(&self, id: &WorkflowId) -> CoreResult<(Workflow, Vec<Task>)> {
        let workflow = self.workflows.require(id).await?;
        let tasks = self.tasks.list_by_workflow(id).await?;
        Ok((workflow, tasks))
    }

    pub async fn list(&self, filter: &WorkflowFilter) -> CoreResult<Vec<Workflow>> {
        self.workflows.list(filter).await
    }

    /// True when every task of the workflow is terminal and at least one
    /// exists.
    pub async fn all_tasks_terminal(&self, id: &WorkflowId) -> CoreResult<bool> {
        let tasks = self.tasks.list_by_workflow(id).await?;
        Ok(!tasks.is_empty() && tasks.iter().all(Task::is_terminal))
    }
}
