//! Progress written by an execution only counts while that execution still
//! owns the task.

use crate::common::TestHarness;
use std::path::Path;
use taskrunner_core::execution::{DispatchCallbacks, WorkloadError, WorkloadOutcome};
use taskrunner_core::models::{ExternalId, NewTask, Task, TaskType};
use taskrunner_core::state_machine::{Checkpoint, StateMachineError, TaskStatus};

async fn insert_with_status(harness: &TestHarness, status: TaskStatus, step: i64) -> Task {
    let mut task = NewTask::new(TaskType::Large).into_task();
    task.status = status;
    task.step = step;
    harness.context().store.insert_task(&task).await.unwrap()
}

#[tokio::test]
async fn test_checkpoint_only_advances_a_running_task() {
    let harness = TestHarness::new(0);
    let task = insert_with_status(&harness, TaskStatus::Running, 10).await;

    let behind = harness.tasks.checkpoint(task.task_id, None, 5).await.unwrap();
    assert!(matches!(behind, Checkpoint::Discarded));
    let same = harness.tasks.checkpoint(task.task_id, None, 10).await.unwrap();
    assert!(matches!(same, Checkpoint::Discarded));

    match harness.tasks.checkpoint(task.task_id, None, 11).await.unwrap() {
        Checkpoint::Written(written) => assert_eq!(written.step, 11),
        Checkpoint::Discarded => panic!("advancing checkpoint was discarded"),
    }

    let paused = insert_with_status(&harness, TaskStatus::Paused, 10).await;
    let late = harness.tasks.checkpoint(paused.task_id, None, 11).await.unwrap();
    assert!(matches!(late, Checkpoint::Discarded));
    assert_eq!(harness.task(paused.task_id).await.step, 10);
}

#[tokio::test]
async fn test_checkpoint_from_superseded_execution_is_discarded() {
    let harness = TestHarness::new(0);
    let task = insert_with_status(&harness, TaskStatus::Running, 3).await;
    let handles = &harness.context().handles;

    let old = ExternalId::new("exec-old");
    let new = ExternalId::new("exec-new");
    handles.record(task.task_id, old.clone()).await.unwrap();
    handles.record(task.task_id, new.clone()).await.unwrap();

    let stale = harness
        .tasks
        .checkpoint(task.task_id, Some(&old), 4)
        .await
        .unwrap();
    assert!(matches!(stale, Checkpoint::Discarded));

    let current = harness
        .tasks
        .checkpoint(task.task_id, Some(&new), 4)
        .await
        .unwrap();
    assert!(matches!(current, Checkpoint::Written(_)));
}

#[tokio::test]
async fn test_stale_execution_cannot_mark_running() {
    let harness = TestHarness::new(0);
    let task = insert_with_status(&harness, TaskStatus::Starting, 7).await;
    let handles = &harness.context().handles;

    let old = ExternalId::new("exec-1");
    let new = ExternalId::new("exec-2");
    handles.record(task.task_id, old.clone()).await.unwrap();
    handles.record(task.task_id, new.clone()).await.unwrap();

    let refused = harness
        .tasks
        .mark_running(task.task_id, true, Some(&old), "unused.log".to_string())
        .await
        .unwrap();
    assert!(refused.is_none());
    assert_eq!(harness.task(task.task_id).await.status, TaskStatus::Starting);

    let running = harness
        .tasks
        .mark_running(task.task_id, true, Some(&new), "info.log".to_string())
        .await
        .unwrap()
        .expect("current execution starts");
    assert_eq!(running.status, TaskStatus::Running);
    // continue mode keeps the checkpoint
    assert_eq!(running.step, 7);
    assert_eq!(running.log_path.as_deref(), Some("info.log"));
    assert!(running.started_at.is_some());
}

#[tokio::test]
async fn test_fresh_run_starts_from_first_step() {
    let harness = TestHarness::new(0);
    let task = insert_with_status(&harness, TaskStatus::Starting, 7).await;

    let running = harness
        .tasks
        .mark_running(task.task_id, false, None, "info.log".to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(running.step, 1);
}

#[tokio::test]
async fn test_completion_from_superseded_execution_is_ignored() {
    let harness = TestHarness::new(0);
    let task = insert_with_status(&harness, TaskStatus::Running, 3).await;
    let handles = &harness.context().handles;

    let old = ExternalId::new("exec-a");
    let new = ExternalId::new("exec-b");
    handles.record(task.task_id, old.clone()).await.unwrap();
    handles.record(task.task_id, new.clone()).await.unwrap();

    harness
        .tasks
        .on_failure(old, WorkloadError::Internal("lost".to_string()))
        .await;
    assert_eq!(harness.task(task.task_id).await.status, TaskStatus::Running);

    harness
        .tasks
        .on_success(ExternalId::new("exec-unknown"), WorkloadOutcome::Completed)
        .await;
    assert_eq!(harness.task(task.task_id).await.status, TaskStatus::Running);

    harness
        .tasks
        .on_success(new, WorkloadOutcome::Completed)
        .await;
    let finished = harness.task(task.task_id).await;
    assert_eq!(finished.status, TaskStatus::Finished);
    assert!(finished.finished_at.is_some());
}

#[tokio::test]
async fn test_interrupted_outcome_does_not_finish() {
    let harness = TestHarness::new(0);
    let task = insert_with_status(&harness, TaskStatus::Running, 3).await;
    let id = ExternalId::new("exec-x");
    harness
        .context()
        .handles
        .record(task.task_id, id.clone())
        .await
        .unwrap();

    harness
        .tasks
        .on_success(id, WorkloadOutcome::Interrupted)
        .await;
    assert_eq!(harness.task(task.task_id).await.status, TaskStatus::Running);
}

#[tokio::test]
async fn test_delete_task_removes_handles_and_logs() {
    let harness = TestHarness::new(0);
    let task = harness
        .tasks
        .create_task(NewTask::new(TaskType::Small).debug())
        .await
        .unwrap();
    let log_path = task.log_path.clone().expect("log path set by the run");
    assert!(Path::new(&log_path).exists());

    assert!(harness.tasks.delete_task(task.task_id).await.unwrap());

    assert!(matches!(
        harness.tasks.get_task(task.task_id).await,
        Err(StateMachineError::TaskNotFound(_))
    ));
    assert!(harness
        .context()
        .handles
        .history(task.task_id)
        .await
        .unwrap()
        .is_empty());
    assert!(!Path::new(&log_path).exists());
    assert!(!harness.tasks.delete_task(task.task_id).await.unwrap());
}

#[tokio::test]
async fn test_delete_running_task_terminates_execution() {
    let harness = TestHarness::new(10);
    let created = harness
        .tasks
        .create_task(NewTask::new(TaskType::Large))
        .await
        .unwrap();
    harness.wait_for_step(created.task_id, 2).await;

    assert!(harness.tasks.delete_task(created.task_id).await.unwrap());
    harness.wait_idle().await;
    assert!(harness.tasks.list_tasks().await.unwrap().is_empty());
}
