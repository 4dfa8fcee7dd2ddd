//! Scheduler: readiness computation, parallel-group bundling, and progress
//! snapshots over the persisted task graph.
//!
//! Read-mostly; every method is a snapshot read of the store at the moment
//! of the call.

use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};

use crate::adapters::sqlite::{SqliteTaskRepository, SqliteWorkflowRepository};
use crate::domain::errors::CoreResult;
use crate::domain::ids::{TaskId, WorkflowId};
use crate::domain::models::{DependencyType, Task, TaskStatus, WorkflowStatus};
use crate::services::plan_graph;

/// A returnable task enriched with parallelism hints.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub task: Task,
    /// Whether the task carries a parallel group label
    pub can_parallelize: bool,
    /// Ids of its siblings in the same group
    pub parallel_with: Vec<TaskId>,
    /// Names of its already-terminal blocking predecessors
    pub dependencies_completed: Vec<String>,
}

/// Result of a readiness poll.
#[derive(Debug, Clone)]
pub struct NextTasks {
    pub tasks: Vec<ScheduledTask>,
    /// True when the workflow has tasks and every one is terminal
    pub all_complete: bool,
    pub workflow_status: WorkflowStatus,
    pub max_parallel: u32,
    /// `min(tasks.len(), max_parallel)`
    pub recommended_count: usize,
}

/// A task explained as blocked.
#[derive(Debug, Clone)]
pub struct BlockedTask {
    pub id: TaskId,
    pub name: String,
    pub blocked_by: Vec<String>,
}

/// Per-group progress aggregation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupProgress {
    pub task_count: u64,
    pub completed: u64,
}

/// Workflow progress snapshot.
#[derive(Debug, Clone, Default)]
pub struct WorkflowProgress {
    pub total_tasks: u64,
    pub by_status: HashMap<TaskStatus, u64>,
    /// Largest sequence s such that every task with sequence <= s is
    /// terminal
    pub completed_sequence: u32,
    pub current_sequence: u32,
    pub blocked_tasks: Vec<BlockedTask>,
    pub parallel_groups: HashMap<String, GroupProgress>,
    /// Count of non-terminal tasks
    pub estimated_remaining: u64,
}

#[derive(Clone)]
pub struct Scheduler {
    tasks: SqliteTaskRepository,
    workflows: SqliteWorkflowRepository,
}

impl Scheduler {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            tasks: SqliteTaskRepository::new(pool.clone()),
            workflows: SqliteWorkflowRepository::new(pool),
        }
    }

    /// The tasks an agent could pick up right now, enriched with
    /// parallelism hints. Tasks sitting on a dependency cycle are never
    /// returned, so a manually corrupted graph degrades to "nothing to do"
    /// rather than a wedge or a livelock.
    pub async fn next_tasks(
        &self,
        workflow_id: &WorkflowId,
        include_failed: bool,
    ) -> CoreResult<NextTasks> {
        let workflow = self.workflows.require(workflow_id).await?;
        let all_tasks = self.tasks.list_by_workflow(workflow_id).await?;
        let available = self
            .tasks
            .list_available(Some(workflow_id), include_failed, u32::MAX)
            .await?;

        let cyclic = self.cyclic_task_ids(workflow_id).await?;

        let mut scheduled = Vec::with_capacity(available.len());
        for task in available {
            if cyclic.contains(&task.id) {
                continue;
            }
            let parallel_with = match &task.parallel_group {
                Some(group) => {
                    self.tasks
                        .parallel_siblings(workflow_id, group, &task.id)
                        .await?
                }
                None => Vec::new(),
            };
            let dependencies_completed = self
                .tasks
                .satisfied_blockers(&task.id)
                .await?
                .into_iter()
                .map(|b| b.name)
                .collect();
            scheduled.push(ScheduledTask {
                can_parallelize: task.parallel_group.is_some(),
                parallel_with,
                dependencies_completed,
                task,
            });
        }

        let all_complete = !all_tasks.is_empty() && all_tasks.iter().all(Task::is_terminal);
        let recommended_count = scheduled.len().min(workflow.max_parallel_tasks as usize);
        Ok(NextTasks {
            tasks: scheduled,
            all_complete,
            workflow_status: workflow.status,
            max_parallel: workflow.max_parallel_tasks,
            recommended_count,
        })
    }

    /// Progress snapshot across the whole task graph.
    pub async fn progress(&self, workflow_id: &WorkflowId) -> CoreResult<WorkflowProgress> {
        self.workflows.require(workflow_id).await?;
        let tasks = self.tasks.list_by_workflow(workflow_id).await?;
        let edges = self.tasks.dependencies_in_workflow(workflow_id).await?;

        let mut by_status: HashMap<TaskStatus, u64> = HashMap::new();
        for task in &tasks {
            *by_status.entry(task.status).or_insert(0) += 1;
        }

        let mut completed_sequence = 0u32;
        let mut ordered: Vec<&Task> = tasks.iter().collect();
        ordered.sort_by_key(|t| t.sequence);
        for task in &ordered {
            if task.is_terminal() && task.sequence == completed_sequence + 1 {
                completed_sequence = task.sequence;
            } else if !task.is_terminal() {
                break;
            }
        }

        let by_id: HashMap<&TaskId, &Task> = tasks.iter().map(|t| (&t.id, t)).collect();
        let mut blocked_tasks = Vec::new();
        for task in &tasks {
            if task.is_terminal() {
                continue;
            }
            let blocked_by: Vec<String> = edges
                .iter()
                .filter(|e| e.task_id == task.id && e.dependency_type == DependencyType::Blocks)
                .filter_map(|e| by_id.get(&e.depends_on_id))
                .filter(|dep| !dep.is_terminal())
                .map(|dep| dep.name.clone())
                .collect();
            if !blocked_by.is_empty() {
                blocked_tasks.push(BlockedTask {
                    id: task.id.clone(),
                    name: task.name.clone(),
                    blocked_by,
                });
            }
        }

        let mut parallel_groups: HashMap<String, GroupProgress> = HashMap::new();
        for task in &tasks {
            if let Some(group) = &task.parallel_group {
                let entry = parallel_groups.entry(group.clone()).or_default();
                entry.task_count += 1;
                if task.status == TaskStatus::Completed {
                    entry.completed += 1;
                }
            }
        }

        let estimated_remaining = tasks.iter().filter(|t| !t.is_terminal()).count() as u64;
        Ok(WorkflowProgress {
            total_tasks: tasks.len() as u64,
            by_status,
            completed_sequence,
            current_sequence: completed_sequence + 1,
            blocked_tasks,
            parallel_groups,
            estimated_remaining,
        })
    }

    /// Dependency satisfaction snapshot for one task.
    pub async fn check_dependencies(
        &self,
        task_id: &TaskId,
    ) -> CoreResult<crate::services::task_service::DependencyCheck> {
        let completed = self.tasks.satisfied_blockers(task_id).await?;
        let pending = self.tasks.unsatisfied_blockers(task_id).await?;
        Ok(crate::services::task_service::DependencyCheck {
            satisfied: pending.is_empty(),
            completed,
            pending,
        })
    }

    /// Ids of tasks participating in a blocking-dependency cycle.
    async fn cyclic_task_ids(&self, workflow_id: &WorkflowId) -> CoreResult<HashSet<TaskId>> {
        let edges = self.tasks.dependencies_in_workflow(workflow_id).await?;
        let blocking: Vec<(TaskId, TaskId)> = edges
            .into_iter()
            .filter(|e| e.dependency_type == DependencyType::Blocks)
            .map(|e| (e.task_id, e.depends_on_id))
            .collect();
        Ok(plan_graph::nodes_in_cycles(&blocking))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::models::TaskDependency;
    use crate::services::plan_graph::{PlanInput, PlanTaskInput};
    use crate::services::workflow_service::{CreateWorkflow, WorkflowService};

    struct Fixture {
        scheduler: Scheduler,
        workflows: WorkflowService,
        tasks: SqliteTaskRepository,
    }

    async fn setup() -> Fixture {
        let pool = create_migrated_test_pool().await.unwrap();
        Fixture {
            scheduler: Scheduler::new(pool.clone()),
            workflows: WorkflowService::new(pool.clone()),
            tasks: SqliteTaskRepository::new(pool),
        }
    }

    fn plan(tasks: Vec<(&str, Vec<&str>, Option<&str>)>) -> PlanInput {
        PlanInput {
            summary: None,
            tasks: tasks
                .into_iter()
                .map(|(name, deps, group)| PlanTaskInput {
                    name: name.to_string(),
                    depends_on: deps.into_iter().map(str::to_string).collect(),
                    parallel_group: group.map(str::to_string),
                    ..Default::default()
                })
                .collect(),
        }
    }

    async fn complete(fx: &Fixture, id: &TaskId) {
        let mut task = fx.tasks.require(id).await.unwrap();
        task.status = TaskStatus::Completed;
        task.outcome = Some("ok".to_string());
        fx.tasks.update(&task).await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_workflow_is_not_complete() {
        let fx = setup().await;
        let wf = fx
            .workflows
            .create(CreateWorkflow {
                name: "empty".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let next = fx.scheduler.next_tasks(&wf.id, false).await.unwrap();
        assert!(next.tasks.is_empty());
        assert!(!next.all_complete);
    }

    #[tokio::test]
    async fn test_linear_plan_releases_one_at_a_time() {
        let fx = setup().await;
        let wf = fx
            .workflows
            .create(CreateWorkflow {
                name: "linear".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        fx.workflows
            .set_plan(
                &wf.id,
                plan(vec![
                    ("a", vec![], None),
                    ("b", vec!["a"], None),
                    ("c", vec!["b"], None),
                ]),
            )
            .await
            .unwrap();

        let next = fx.scheduler.next_tasks(&wf.id, false).await.unwrap();
        assert_eq!(next.tasks.len(), 1);
        assert_eq!(next.tasks[0].task.name, "a");
        assert_eq!(next.recommended_count, 1);

        complete(&fx, &next.tasks[0].task.id).await;
        let next = fx.scheduler.next_tasks(&wf.id, false).await.unwrap();
        assert_eq!(next.tasks.len(), 1);
        assert_eq!(next.tasks[0].task.name, "b");
        assert_eq!(next.tasks[0].dependencies_completed, vec!["a"]);
    }

    #[tokio::test]
    async fn test_parallel_group_bundles_siblings() {
        let fx = setup().await;
        let wf = fx
            .workflows
            .create(CreateWorkflow {
                name: "par".to_string(),
                max_parallel_tasks: Some(4),
                ..Default::default()
            })
            .await
            .unwrap();
        fx.workflows
            .set_plan(
                &wf.id,
                plan(vec![
                    ("a", vec![], None),
                    ("b", vec!["a"], Some("g")),
                    ("c", vec!["a"], Some("g")),
                    ("d", vec!["b", "c"], None),
                ]),
            )
            .await
            .unwrap();

        let next = fx.scheduler.next_tasks(&wf.id, false).await.unwrap();
        complete(&fx, &next.tasks[0].task.id).await;

        let next = fx.scheduler.next_tasks(&wf.id, false).await.unwrap();
        let names: Vec<&str> = next.tasks.iter().map(|t| t.task.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
        for scheduled in &next.tasks {
            assert!(scheduled.can_parallelize);
            assert_eq!(scheduled.parallel_with.len(), 1);
        }
        assert_eq!(next.recommended_count, 2);

        for scheduled in &next.tasks {
            complete(&fx, &scheduled.task.id).await;
        }
        let next = fx.scheduler.next_tasks(&wf.id, false).await.unwrap();
        assert_eq!(next.tasks.len(), 1);
        assert_eq!(next.tasks[0].task.name, "d");
    }

    #[tokio::test]
    async fn test_all_complete_flag() {
        let fx = setup().await;
        let wf = fx
            .workflows
            .create(CreateWorkflow {
                name: "done".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        fx.workflows
            .set_plan(&wf.id, plan(vec![("only", vec![], None)]))
            .await
            .unwrap();

        let next = fx.scheduler.next_tasks(&wf.id, false).await.unwrap();
        complete(&fx, &next.tasks[0].task.id).await;

        let next = fx.scheduler.next_tasks(&wf.id, false).await.unwrap();
        assert!(next.all_complete);
        assert!(next.tasks.is_empty());
    }

    #[tokio::test]
    async fn test_cyclic_tasks_are_never_returned() {
        let fx = setup().await;
        let wf = fx
            .workflows
            .create(CreateWorkflow {
                name: "cyclic".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        fx.workflows
            .set_plan(&wf.id, plan(vec![("a", vec![], None), ("b", vec![], None)]))
            .await
            .unwrap();

        // Manually corrupt the graph into a cycle a <-> b
        let (_, tasks) = fx.workflows.get_with_tasks(&wf.id).await.unwrap();
        fx.tasks
            .add_dependency(&TaskDependency {
                task_id: tasks[0].id.clone(),
                depends_on_id: tasks[1].id.clone(),
                dependency_type: crate::domain::models::DependencyType::Blocks,
            })
            .await
            .unwrap();
        fx.tasks
            .add_dependency(&TaskDependency {
                task_id: tasks[1].id.clone(),
                depends_on_id: tasks[0].id.clone(),
                dependency_type: crate::domain::models::DependencyType::Blocks,
            })
            .await
            .unwrap();

        let next = fx.scheduler.next_tasks(&wf.id, false).await.unwrap();
        assert!(next.tasks.is_empty());
        assert!(!next.all_complete);
    }

    #[tokio::test]
    async fn test_progress_snapshot() {
        let fx = setup().await;
        let wf = fx
            .workflows
            .create(CreateWorkflow {
                name: "prog".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        fx.workflows
            .set_plan(
                &wf.id,
                plan(vec![
                    ("a", vec![], None),
                    ("b", vec!["a"], Some("g")),
                    ("c", vec!["a"], Some("g")),
                ]),
            )
            .await
            .unwrap();

        let (_, tasks) = fx.workflows.get_with_tasks(&wf.id).await.unwrap();
        complete(&fx, &tasks[0].id).await;
        complete(&fx, &tasks[1].id).await;

        let progress = fx.scheduler.progress(&wf.id).await.unwrap();
        assert_eq!(progress.total_tasks, 3);
        assert_eq!(progress.completed_sequence, 2);
        assert_eq!(progress.current_sequence, 3);
        assert_eq!(progress.estimated_remaining, 1);
        assert_eq!(progress.by_status.get(&TaskStatus::Completed), Some(&2));
        assert_eq!(progress.by_status.get(&TaskStatus::Pending), Some(&1));
        let sum: u64 = progress.by_status.values().sum();
        assert_eq!(sum, progress.total_tasks);

        let group = progress.parallel_groups.get("g").unwrap();
        assert_eq!(group.task_count, 2);
        assert_eq!(group.completed, 1);
        // c's blocker a is complete, so nothing is blocked now
        assert!(progress.blocked_tasks.is_empty());
    }

    #[tokio::test]
    async fn test_blocked_tasks_name_their_blockers() {
        let fx = setup().await;
        let wf = fx
            .workflows
            .create(CreateWorkflow {
                name: "blocked".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        fx.workflows
            .set_plan(&wf.id, plan(vec![("a", vec![], None), ("b", vec!["a"], None)]))
            .await
            .unwrap();

        let progress = fx.scheduler.progress(&wf.id).await.unwrap();
        assert_eq!(progress.blocked_tasks.len(), 1);
        assert_eq!(progress.blocked_tasks[0].name, "b");
        assert_eq!(progress.blocked_tasks[0].blocked_by, vec!["a"]);
    }
}
