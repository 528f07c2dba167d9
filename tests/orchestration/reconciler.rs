use crate::common::TestHarness;
use taskrunner_core::config::OrphanPolicy;
use taskrunner_core::models::{ExternalId, NewTask, Task, TaskType};
use taskrunner_core::orchestration::{ReconcileReport, Reconciler};
use taskrunner_core::state_machine::TaskStatus;

async fn orphan(harness: &TestHarness, status: TaskStatus, with_dead_handle: bool) -> Task {
    let mut task = NewTask::new(TaskType::Large).into_task();
    task.status = status;
    task.step = 42;
    let task = harness.context().store.insert_task(&task).await.unwrap();
    if with_dead_handle {
        harness
            .context()
            .handles
            .record(task.task_id, ExternalId::new("lost-worker"))
            .await
            .unwrap();
    }
    task
}

#[tokio::test]
async fn test_sweep_fails_orphans_by_default() {
    let harness = TestHarness::new(0);
    let running = orphan(&harness, TaskStatus::Running, true).await;
    let starting = orphan(&harness, TaskStatus::Starting, false).await;
    let paused = orphan(&harness, TaskStatus::Paused, false).await;

    let report = Reconciler::new(harness.tasks.clone()).sweep().await.unwrap();
    assert_eq!(
        report,
        ReconcileReport {
            inspected: 2,
            failed: 2,
            paused: 0
        }
    );

    for task_id in [running.task_id, starting.task_id] {
        let task = harness.task(task_id).await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.finished_at.is_some());
    }
    assert_eq!(harness.task(paused.task_id).await.status, TaskStatus::Paused);
}

#[tokio::test]
async fn test_pause_policy_keeps_running_orphans_resumable() {
    let harness = TestHarness::new(0);
    let running = orphan(&harness, TaskStatus::Running, true).await;
    let starting = orphan(&harness, TaskStatus::Starting, true).await;

    let report = Reconciler::new(harness.tasks.clone())
        .with_policy(OrphanPolicy::Pause)
        .sweep()
        .await
        .unwrap();
    assert_eq!(report.paused, 1);
    assert_eq!(report.failed, 1);

    let paused = harness.task(running.task_id).await;
    assert_eq!(paused.status, TaskStatus::Paused);
    assert_eq!(paused.step, 42);
    assert_eq!(harness.task(starting.task_id).await.status, TaskStatus::Failed);

    // the checkpoint survives into the resumed run
    harness.tasks.resume(running.task_id).await.unwrap();
    let resumed = harness.wait_for_status(running.task_id, TaskStatus::Finished).await;
    assert_eq!(resumed.step, 10000);
}

#[tokio::test]
async fn test_live_executions_are_left_alone() {
    let harness = TestHarness::new(10);
    let created = harness
        .tasks
        .create_task(NewTask::new(TaskType::Large))
        .await
        .unwrap();
    harness.wait_for_step(created.task_id, 2).await;

    let report = Reconciler::new(harness.tasks.clone()).sweep().await.unwrap();
    assert_eq!(
        report,
        ReconcileReport {
            inspected: 1,
            failed: 0,
            paused: 0
        }
    );
    assert_eq!(harness.task(created.task_id).await.status, TaskStatus::Running);

    harness.tasks.cancel(created.task_id).await.unwrap();
    harness.wait_idle().await;
}
