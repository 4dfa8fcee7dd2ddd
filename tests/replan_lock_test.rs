//! Replan-from-failure and workflow lock contention.

use caw::adapters::sqlite::create_migrated_test_pool;
use caw::domain::models::{CheckpointType, LockOutcome, TaskStatus, WorkflowStatus};
use caw::services::{
    CreateWorkflow, LockService, PlanInput, PlanTaskInput, RegisterSession, SessionService,
    StatusChange, TaskService, WorkflowService,
};

#[tokio::test]
async fn replan_after_failure_resets_and_records_reason() {
    let pool = create_migrated_test_pool().await.unwrap();
    let workflows = WorkflowService::new(pool.clone());
    let tasks = TaskService::new(pool.clone());

    let wf = workflows
        .create(CreateWorkflow {
            name: "replan".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    workflows
        .set_plan(
            &wf.id,
            PlanInput {
                summary: None,
                tasks: vec![PlanTaskInput {
                    name: "A".to_string(),
                    ..Default::default()
                }],
            },
        )
        .await
        .unwrap();
    let (_, task_list) = workflows.get_with_tasks(&wf.id).await.unwrap();
    let a = task_list[0].id.clone();

    // Drive A into failure, with one checkpoint on the way
    tasks
        .update_status(&a, TaskStatus::Planning, StatusChange::default())
        .await
        .unwrap();
    tasks
        .update_status(&a, TaskStatus::InProgress, StatusChange::default())
        .await
        .unwrap();
    tasks
        .checkpoint(&a, CheckpointType::Progress, "attempt one", None, None)
        .await
        .unwrap();
    tasks
        .update_status(
            &a,
            TaskStatus::Failed,
            StatusChange {
                outcome: None,
                error: Some("flaky".to_string()),
            },
        )
        .await
        .unwrap();

    let checkpoint = tasks
        .replan(&a, "retry", &serde_json::json!({"steps": ["..."]}))
        .await
        .unwrap();

    let replanned = tasks.get(&a).await.unwrap();
    assert_eq!(replanned.status, TaskStatus::Pending);
    assert!(replanned.outcome.is_none());
    assert!(replanned.outcome_detail.is_none());
    assert_eq!(checkpoint.checkpoint_type, CheckpointType::Replan);
    assert_eq!(checkpoint.summary, "retry");
    assert_eq!(checkpoint.sequence, 2);

    // Checkpoint sequences stay dense after the replan
    let with_history = tasks.get_with_checkpoints(&a, None).await.unwrap();
    let sequences: Vec<u32> = with_history.checkpoints.iter().map(|c| c.sequence).collect();
    assert_eq!(sequences, vec![1, 2]);
}

#[tokio::test]
async fn lock_contention_between_two_sessions() {
    let pool = create_migrated_test_pool().await.unwrap();
    let workflows = WorkflowService::new(pool.clone());
    let sessions = SessionService::new(pool.clone());
    let locks = LockService::new(pool);

    let wf = workflows
        .create(CreateWorkflow {
            name: "locked".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    let s1 = sessions
        .register(RegisterSession {
            pid: 1,
            ..Default::default()
        })
        .await
        .unwrap();
    let s2 = sessions
        .register(RegisterSession {
            pid: 2,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(locks.lock(&wf.id, &s1.id).await.unwrap(), LockOutcome::Acquired);
    assert_eq!(
        locks.lock(&wf.id, &s2.id).await.unwrap(),
        LockOutcome::HeldBy(s1.id.clone())
    );
    assert!(!locks.unlock(&wf.id, &s2.id).await.unwrap());
    assert!(locks.unlock(&wf.id, &s1.id).await.unwrap());
    assert_eq!(locks.lock(&wf.id, &s2.id).await.unwrap(), LockOutcome::Acquired);

    let info = locks.lock_info(&wf.id).await.unwrap();
    assert!(info.locked);
    assert_eq!(info.session_id, Some(s2.id));
    assert_eq!(info.session_pid, Some(2));
}

#[tokio::test]
async fn plan_admission_is_all_or_nothing() {
    let pool = create_migrated_test_pool().await.unwrap();
    let workflows = WorkflowService::new(pool);

    let wf = workflows
        .create(CreateWorkflow {
            name: "atomic".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    // A good plan lands fully
    workflows
        .set_plan(
            &wf.id,
            PlanInput {
                summary: Some("good".to_string()),
                tasks: vec![
                    PlanTaskInput {
                        name: "one".to_string(),
                        ..Default::default()
                    },
                    PlanTaskInput {
                        name: "two".to_string(),
                        depends_on: vec!["one".to_string()],
                        ..Default::default()
                    },
                ],
            },
        )
        .await
        .unwrap();
    let (workflow, tasks) = workflows.get_with_tasks(&wf.id).await.unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Ready);
    assert_eq!(tasks.len(), 2);
    assert_eq!(workflow.plan_summary.as_deref(), Some("good"));
}
