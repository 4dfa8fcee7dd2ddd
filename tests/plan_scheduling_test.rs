//! End-to-end scheduling over admitted plans: linear chains and parallel
//! groups.

use caw::adapters::sqlite::{create_migrated_test_pool, SqliteAgentRepository};
use caw::domain::ids::TaskId;
use caw::domain::models::{Agent, ClaimOutcome, TaskStatus, Workflow, WorkflowStatus};
use caw::services::{
    PlanInput, PlanTaskInput, Scheduler, StatusChange, TaskService, WorkflowService,
};

fn plan(tasks: Vec<(&str, Vec<&str>, Option<&str>)>) -> PlanInput {
    PlanInput {
        summary: Some("scenario".to_string()),
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

struct Harness {
    workflows: WorkflowService,
    tasks: TaskService,
    scheduler: Scheduler,
    agents: SqliteAgentRepository,
    workflow: Workflow,
}

async fn harness(tasks: Vec<(&str, Vec<&str>, Option<&str>)>) -> Harness {
    let pool = create_migrated_test_pool().await.unwrap();
    let workflows = WorkflowService::new(pool.clone());
    let workflow = workflows
        .create(caw::services::CreateWorkflow {
            name: "scenario".to_string(),
            max_parallel_tasks: Some(4),
            ..Default::default()
        })
        .await
        .unwrap();
    workflows.set_plan(&workflow.id, plan(tasks)).await.unwrap();
    let workflow = workflows.get(&workflow.id).await.unwrap();
    Harness {
        workflows,
        tasks: TaskService::new(pool.clone()),
        scheduler: Scheduler::new(pool.clone()),
        agents: SqliteAgentRepository::new(pool),
        workflow,
    }
}

async fn drive_to_completion(h: &Harness, task_id: &TaskId, outcome: &str) {
    h.tasks
        .update_status(task_id, TaskStatus::Planning, StatusChange::default())
        .await
        .unwrap();
    h.tasks
        .update_status(task_id, TaskStatus::InProgress, StatusChange::default())
        .await
        .unwrap();
    h.tasks
        .update_status(
            task_id,
            TaskStatus::Completed,
            StatusChange {
                outcome: Some(outcome.to_string()),
                error: None,
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn linear_plan_runs_in_dependency_order() {
    let h = harness(vec![
        ("A", vec![], None),
        ("B", vec!["A"], None),
        ("C", vec!["B"], None),
    ])
    .await;

    assert_eq!(h.workflow.status, WorkflowStatus::Ready);
    let (_, tasks) = h.workflows.get_with_tasks(&h.workflow.id).await.unwrap();
    let sequences: Vec<u32> = tasks.iter().map(|t| t.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);

    // Only A is returnable
    let next = h.scheduler.next_tasks(&h.workflow.id, false).await.unwrap();
    assert_eq!(next.tasks.len(), 1);
    assert_eq!(next.tasks[0].task.name, "A");
    let a_id = next.tasks[0].task.id.clone();

    // Claim A, drive it to completion, release
    let agent = Agent::new("X", "test");
    h.agents.create(&agent).await.unwrap();
    assert_eq!(
        h.tasks.claim(&a_id, &agent.id).await.unwrap(),
        ClaimOutcome::Claimed
    );
    drive_to_completion(&h, &a_id, "ok").await;
    h.tasks.release(&a_id, &agent.id).await.unwrap();

    // B becomes the next returnable task
    let next = h.scheduler.next_tasks(&h.workflow.id, false).await.unwrap();
    assert_eq!(next.tasks.len(), 1);
    assert_eq!(next.tasks[0].task.name, "B");
}

#[tokio::test]
async fn parallel_group_becomes_ready_together() {
    let h = harness(vec![
        ("A", vec![], None),
        ("B", vec!["A"], Some("g")),
        ("C", vec!["A"], Some("g")),
        ("D", vec!["B", "C"], None),
    ])
    .await;

    let next = h.scheduler.next_tasks(&h.workflow.id, false).await.unwrap();
    assert_eq!(next.tasks.len(), 1);
    drive_to_completion(&h, &next.tasks[0].task.id.clone(), "done").await;

    // B and C surface together with parallelism hints
    let next = h.scheduler.next_tasks(&h.workflow.id, false).await.unwrap();
    let names: Vec<&str> = next.tasks.iter().map(|t| t.task.name.as_str()).collect();
    assert_eq!(names, vec!["B", "C"]);
    for scheduled in &next.tasks {
        assert!(scheduled.can_parallelize);
        assert_eq!(scheduled.parallel_with.len(), 1);
    }

    // D only after both siblings finish
    let b = next.tasks[0].task.id.clone();
    let c = next.tasks[1].task.id.clone();
    drive_to_completion(&h, &b, "done").await;
    let next = h.scheduler.next_tasks(&h.workflow.id, false).await.unwrap();
    assert_eq!(
        next.tasks.iter().map(|t| t.task.name.as_str()).collect::<Vec<_>>(),
        vec!["C"]
    );
    drive_to_completion(&h, &c, "done").await;

    let next = h.scheduler.next_tasks(&h.workflow.id, false).await.unwrap();
    assert_eq!(next.tasks.len(), 1);
    assert_eq!(next.tasks[0].task.name, "D");
}

#[tokio::test]
async fn blocking_edge_invariant_holds_throughout() {
    let h = harness(vec![
        ("A", vec![], None),
        ("B", vec!["A"], None),
    ])
    .await;

    // At every step: if B has advanced past pending, A must be terminal
    let check = |tasks: &[caw::domain::models::Task]| {
        let a = tasks.iter().find(|t| t.name == "A").unwrap();
        let b = tasks.iter().find(|t| t.name == "B").unwrap();
        if matches!(
            b.status,
            TaskStatus::Planning
                | TaskStatus::InProgress
                | TaskStatus::Paused
                | TaskStatus::Completed
        ) {
            assert!(a.status.is_terminal(), "A must be terminal before B starts");
        }
    };

    let (_, tasks) = h.workflows.get_with_tasks(&h.workflow.id).await.unwrap();
    check(&tasks);

    let a_id = tasks.iter().find(|t| t.name == "A").unwrap().id.clone();
    drive_to_completion(&h, &a_id, "ok").await;
    let (_, tasks) = h.workflows.get_with_tasks(&h.workflow.id).await.unwrap();
    check(&tasks);

    let b_id = tasks.iter().find(|t| t.name == "B").unwrap().id.clone();
    drive_to_completion(&h, &b_id, "ok").await;
    let (_, tasks) = h.workflows.get_with_tasks(&h.workflow.id).await.unwrap();
    check(&tasks);

    let next = h.scheduler.next_tasks(&h.workflow.id, false).await.unwrap();
    assert!(next.all_complete);
}

#[tokio::test]
async fn removing_a_middle_task_preserves_reachability() {
    let h = harness(vec![
        ("A", vec![], None),
        ("mid", vec!["A"], None),
        ("Z", vec!["mid"], None),
    ])
    .await;

    let (_, tasks) = h.workflows.get_with_tasks(&h.workflow.id).await.unwrap();
    let mid = tasks.iter().find(|t| t.name == "mid").unwrap().id.clone();
    h.workflows.remove_task(&h.workflow.id, &mid).await.unwrap();

    // Z is still gated on A: completing A is what releases Z
    let next = h.scheduler.next_tasks(&h.workflow.id, false).await.unwrap();
    assert_eq!(
        next.tasks.iter().map(|t| t.task.name.as_str()).collect::<Vec<_>>(),
        vec!["A"]
    );
    let a = next.tasks[0].task.id.clone();
    drive_to_completion(&h, &a, "ok").await;

    let next = h.scheduler.next_tasks(&h.workflow.id, false).await.unwrap();
    assert_eq!(
        next.tasks.iter().map(|t| t.task.name.as_str()).collect::<Vec<_>>(),
        vec!["Z"]
    );
}
