//! Full pipeline through the runner pool: plan admission, bounded parallel
//! execution against mock collaborators, and the post-completion cycle.

use std::sync::Arc;
use std::time::Duration;

use caw::adapters::spawner::{MockSpawnResponse, MockSpawner};
use caw::adapters::sqlite::{
    create_migrated_test_pool, SqliteCheckpointRepository, SqliteTaskRepository,
    SqliteWorkspaceRepository,
};
use caw::adapters::vcs::MockVcs;
use caw::domain::models::{CheckpointType, TaskStatus, WorkflowStatus, WorkspaceStatus};
use caw::services::{
    CreateWorkflow, PlanInput, PlanTaskInput, RunnerPool, RunnerPoolConfig, WorkflowService,
};

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

fn fast_config() -> RunnerPoolConfig {
    RunnerPoolConfig {
        poll_interval: Duration::from_millis(10),
        ..Default::default()
    }
}

#[tokio::test]
async fn diamond_plan_runs_to_completion_with_terminal_checkpoints() {
    let pool = create_migrated_test_pool().await.unwrap();
    let workflows = WorkflowService::new(pool.clone());
    let wf = workflows
        .create(CreateWorkflow {
            name: "diamond".to_string(),
            max_parallel_tasks: Some(2),
            config: Some(serde_json::json!({"pr": {"cycle": "off"}})),
            ..Default::default()
        })
        .await
        .unwrap();
    workflows
        .set_plan(
            &wf.id,
            plan(vec![
                ("root", vec![], None),
                ("left", vec!["root"], Some("wings")),
                ("right", vec!["root"], Some("wings")),
                ("join", vec!["left", "right"], None),
            ]),
        )
        .await
        .unwrap();

    let spawner = Arc::new(MockSpawner::new());
    let runner = RunnerPool::new(
        pool.clone(),
        wf.id.clone(),
        spawner.clone(),
        Arc::new(MockVcs::new()),
        fast_config(),
    );

    let status = runner.run().await.unwrap();
    assert_eq!(status, WorkflowStatus::Completed);
    assert_eq!(
        workflows.get(&wf.id).await.unwrap().status,
        WorkflowStatus::Completed
    );

    let tasks = SqliteTaskRepository::new(pool.clone())
        .list_by_workflow(&wf.id)
        .await
        .unwrap();
    assert_eq!(tasks.len(), 4);
    for task in &tasks {
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.outcome.is_some());
        assert!(task.assigned_agent_id.is_none());
    }

    // Every task carries a terminal checkpoint, sequences dense from 1
    let checkpoints = SqliteCheckpointRepository::new(pool);
    for task in &tasks {
        let history = checkpoints.list_for_task(&task.id).await.unwrap();
        assert!(!history.is_empty());
        let sequences: Vec<u32> = history.iter().map(|c| c.sequence).collect();
        let expected: Vec<u32> = (1..=history.len() as u32).collect();
        assert_eq!(sequences, expected);
        assert_eq!(
            history.last().unwrap().checkpoint_type,
            CheckpointType::Complete
        );
    }

    // The join task ran last
    let requests = spawner.requests().await;
    let join = tasks.iter().find(|t| t.name == "join").unwrap();
    assert_eq!(requests.last().unwrap().task_id, join.id);
}

#[tokio::test]
async fn concurrency_stays_within_the_parallelism_bound() {
    let pool = create_migrated_test_pool().await.unwrap();
    let workflows = WorkflowService::new(pool.clone());
    let wf = workflows
        .create(CreateWorkflow {
            name: "bounded".to_string(),
            max_parallel_tasks: Some(1),
            config: Some(serde_json::json!({"pr": {"cycle": "off"}})),
            ..Default::default()
        })
        .await
        .unwrap();
    workflows
        .set_plan(
            &wf.id,
            plan(vec![
                ("a", vec![], Some("g")),
                ("b", vec![], Some("g")),
                ("c", vec![], Some("g")),
            ]),
        )
        .await
        .unwrap();

    // Slow spawner so overlapping claims would be visible
    let spawner = Arc::new(MockSpawner::with_default_response(MockSpawnResponse {
        progress: vec![(1, "s".to_string())],
        step_delay: Duration::from_millis(30),
        ..Default::default()
    }));
    let runner = RunnerPool::new(
        pool.clone(),
        wf.id.clone(),
        spawner,
        Arc::new(MockVcs::new()),
        fast_config(),
    );

    let tasks_repo = SqliteTaskRepository::new(pool.clone());
    let wf_id = wf.id.clone();
    let watcher = tokio::spawn(async move {
        let mut max_seen = 0usize;
        loop {
            let Ok(tasks) = tasks_repo.list_by_workflow(&wf_id).await else {
                break;
            };
            let in_flight = tasks
                .iter()
                .filter(|t| t.assigned_agent_id.is_some())
                .count();
            max_seen = max_seen.max(in_flight);
            if tasks.iter().all(|t| t.status == TaskStatus::Completed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        max_seen
    });

    runner.run().await.unwrap();
    let max_seen = watcher.await.unwrap();
    assert!(max_seen <= 1, "parallelism bound violated: {max_seen}");
}

#[tokio::test]
async fn auto_cycle_merges_the_workspace_and_completes() {
    let pool = create_migrated_test_pool().await.unwrap();
    let workflows = WorkflowService::new(pool.clone());
    let wf = workflows
        .create(CreateWorkflow {
            name: "auto".to_string(),
            repository_paths: vec!["/srv/app".to_string()],
            auto_create_workspaces: true,
            config: Some(serde_json::json!({"pr": {"cycle": "auto"}})),
            ..Default::default()
        })
        .await
        .unwrap();
    workflows
        .set_plan(&wf.id, plan(vec![("ship", vec![], None)]))
        .await
        .unwrap();

    let vcs = MockVcs::mergeable();
    let runner = RunnerPool::new(
        pool.clone(),
        wf.id.clone(),
        Arc::new(MockSpawner::new()),
        Arc::new(vcs.clone()),
        fast_config(),
    );

    let status = runner.run().await.unwrap();
    assert_eq!(status, WorkflowStatus::Completed);

    let state = vcs.state().await;
    assert_eq!(state.created_worktrees.len(), 1);
    assert_eq!(state.merged_branches.len(), 1);

    let workspaces = SqliteWorkspaceRepository::new(pool)
        .list_by_workflow(&wf.id)
        .await
        .unwrap();
    assert_eq!(workspaces.len(), 1);
    assert_eq!(workspaces[0].status, WorkspaceStatus::Merged);
    assert!(workspaces[0].merge_commit.is_some());
    assert!(workspaces[0].pr_url.is_some());
}

#[tokio::test]
async fn hitl_cycle_waits_for_a_human() {
    let pool = create_migrated_test_pool().await.unwrap();
    let workflows = WorkflowService::new(pool.clone());
    let wf = workflows
        .create(CreateWorkflow {
            name: "hitl".to_string(),
            config: Some(serde_json::json!({"pr": {"cycle": "hitl"}})),
            ..Default::default()
        })
        .await
        .unwrap();
    workflows
        .set_plan(&wf.id, plan(vec![("ship", vec![], None)]))
        .await
        .unwrap();

    let runner = RunnerPool::new(
        pool.clone(),
        wf.id.clone(),
        Arc::new(MockSpawner::new()),
        Arc::new(MockVcs::new()),
        fast_config(),
    );
    let status = runner.run().await.unwrap();
    assert_eq!(status, WorkflowStatus::AwaitingMerge);

    // A human approves; the workflow can then complete
    workflows
        .update_status(&wf.id, WorkflowStatus::Completed)
        .await
        .unwrap();
    assert_eq!(
        workflows.get(&wf.id).await.unwrap().status,
        WorkflowStatus::Completed
    );
}
