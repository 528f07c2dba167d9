use crate::common::faulty_store::FaultyStore;
use crate::common::{wait_until, TestHarness};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use taskrunner_core::constants::{events, task_topic};
use taskrunner_core::models::{NewTask, TaskType};
use taskrunner_core::state_machine::{TaskStatus, TransitionOutcome};

#[tokio::test]
async fn test_dispatched_task_runs_to_finished() {
    let harness = TestHarness::new(0);

    let created = harness
        .tasks
        .create_task(NewTask::new(TaskType::Small))
        .await
        .unwrap();
    assert!(created.status.is_active());

    let task = harness
        .wait_for_status(created.task_id, TaskStatus::Finished)
        .await;
    assert_eq!(task.step, 5);
    assert!(task.started_at.is_some());
    assert!(task.finished_at.is_some());
    assert!(task.log_path.is_some());

    let history = harness.context().handles.history(task.task_id).await.unwrap();
    assert_eq!(history.len(), 1);

    let excerpt = harness.tasks.log_excerpt(task.task_id, 50).await.unwrap();
    assert!(excerpt.iter().any(|l| l.ends_with("Starting small Task")));
    assert!(excerpt.iter().any(|l| l.ends_with("Counting at: 5")));
    assert!(excerpt.last().unwrap().ends_with("Done..."));
}

#[tokio::test]
async fn test_empty_task_finishes_at_first_step() {
    let harness = TestHarness::new(0);

    let task = harness
        .tasks
        .create_task(NewTask::new(TaskType::Empty).debug())
        .await
        .unwrap();

    assert_eq!(task.status, TaskStatus::Finished);
    assert_eq!(task.step, 1);
}

#[tokio::test]
async fn test_failure_type_ends_failed() {
    let harness = TestHarness::new(0);

    let created = harness
        .tasks
        .create_task(NewTask::new(TaskType::Failure))
        .await
        .unwrap();

    let task = harness
        .wait_for_status(created.task_id, TaskStatus::Failed)
        .await;
    assert!(task.finished_at.is_some());
    assert_eq!(task.step, 1);
}

#[tokio::test]
async fn test_pause_preserves_step_and_resume_continues() {
    let harness = TestHarness::new(5);

    let created = harness
        .tasks
        .create_task(NewTask::new(TaskType::Large))
        .await
        .unwrap();
    harness.wait_for_step(created.task_id, 3).await;

    let outcome = harness.tasks.pause(created.task_id).await.unwrap();
    assert_eq!(
        outcome,
        TransitionOutcome::Applied {
            from: TaskStatus::Running,
            to: TaskStatus::Paused
        }
    );

    let paused = harness.task(created.task_id).await;
    assert!(paused.stopped_at.is_some());

    // the interrupted execution must not write past the pause
    tokio::time::sleep(Duration::from_millis(50)).await;
    let still_paused = harness.task(created.task_id).await;
    assert_eq!(still_paused.status, TaskStatus::Paused);
    assert_eq!(still_paused.step, paused.step);

    let outcome = harness.tasks.resume(created.task_id).await.unwrap();
    assert_eq!(
        outcome,
        TransitionOutcome::Applied {
            from: TaskStatus::Paused,
            to: TaskStatus::Starting
        }
    );

    let resumed = harness
        .wait_for_step(created.task_id, paused.step + 2)
        .await;
    assert!(resumed.resumed_at.is_some());
    let history = harness
        .context()
        .handles
        .history(created.task_id)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);

    harness.tasks.cancel(created.task_id).await.unwrap();
    harness.wait_idle().await;
}

#[tokio::test]
async fn test_stopped_task_resumes_from_checkpoint() {
    let harness = TestHarness::new(5);

    let created = harness
        .tasks
        .create_task(NewTask::new(TaskType::Large))
        .await
        .unwrap();
    harness.wait_for_step(created.task_id, 3).await;

    assert!(harness.tasks.stop(created.task_id).await.unwrap().is_applied());
    let stopped = harness.task(created.task_id).await;
    assert_eq!(stopped.status, TaskStatus::Stopped);

    assert!(harness.tasks.resume(created.task_id).await.unwrap().is_applied());
    let resumed = harness
        .wait_for_step(created.task_id, stopped.step + 1)
        .await;
    assert!(resumed.step > stopped.step);

    harness.tasks.cancel(created.task_id).await.unwrap();
    harness.wait_idle().await;
}

#[tokio::test]
async fn test_restart_resets_progress() {
    let harness = TestHarness::new(50);

    let created = harness
        .tasks
        .create_task(NewTask::new(TaskType::Large))
        .await
        .unwrap();
    harness.wait_for_step(created.task_id, 2).await;

    let outcome = harness.tasks.restart(created.task_id).await.unwrap();
    assert_eq!(
        outcome,
        TransitionOutcome::Applied {
            from: TaskStatus::Running,
            to: TaskStatus::Starting
        }
    );

    let restarted = harness.task(created.task_id).await;
    assert_eq!(restarted.step, 1);
    assert!(restarted.finished_at.is_none());
    assert!(restarted.stopped_at.is_none());

    harness
        .wait_for_task(created.task_id, |t| t.status == TaskStatus::Running)
        .await
        .unwrap();
    let history = harness
        .context()
        .handles
        .history(created.task_id)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    // the first execution was signalled and exits at its next unit boundary
    wait_until(|| async { !harness.context().handles.is_live(&history[0]) }).await;

    harness.tasks.cancel(created.task_id).await.unwrap();
    harness.wait_idle().await;
}

#[tokio::test]
async fn test_restart_of_finished_task_runs_again() {
    let harness = TestHarness::new(0);

    let task = harness
        .tasks
        .create_task(NewTask::new(TaskType::Small).debug())
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Finished);

    let outcome = harness.tasks.restart(task.task_id).await.unwrap();
    assert!(outcome.is_applied());

    let rerun = harness.task(task.task_id).await;
    assert_eq!(rerun.status, TaskStatus::Finished);
    assert_eq!(rerun.step, 5);
}

#[tokio::test]
async fn test_cancel_is_idempotent() {
    let harness = TestHarness::new(10);

    let created = harness
        .tasks
        .create_task(NewTask::new(TaskType::Large))
        .await
        .unwrap();
    harness.wait_for_step(created.task_id, 2).await;

    let first = harness.tasks.cancel(created.task_id).await.unwrap();
    assert_eq!(
        first,
        TransitionOutcome::Applied {
            from: TaskStatus::Running,
            to: TaskStatus::Canceled
        }
    );
    let second = harness.tasks.cancel(created.task_id).await.unwrap();
    assert_eq!(
        second,
        TransitionOutcome::Unchanged {
            status: TaskStatus::Canceled
        }
    );

    harness.wait_idle().await;
    let task = harness.task(created.task_id).await;
    assert_eq!(task.status, TaskStatus::Canceled);
    assert!(task.finished_at.is_some());
}

#[tokio::test]
async fn test_status_events_follow_transitions() {
    let harness = TestHarness::new(0);
    let mut rx = harness.context().event_publisher.subscribe();

    let task = harness
        .tasks
        .create_task(NewTask::new(TaskType::Empty).debug())
        .await
        .unwrap();

    let mut statuses = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if event.topic == task_topic(task.task_id) && event.name == events::TASK_STATUS_CHANGED {
            statuses.push(event.context["status"].as_str().unwrap().to_string());
        }
    }
    assert_eq!(statuses, vec!["RUNNING", "FINISHED"]);
}

#[tokio::test]
async fn test_log_lines_are_streamed_on_task_topic() {
    let harness = TestHarness::new(0);
    let mut rx = harness.context().event_publisher.subscribe();

    let task = harness
        .tasks
        .create_task(NewTask::new(TaskType::Small).debug())
        .await
        .unwrap();

    let mut lines = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if event.topic == task_topic(task.task_id) && event.name == events::TASK_LOG_LINE {
            lines.push(event.context["line"].as_str().unwrap().to_string());
        }
    }
    assert!(lines.iter().any(|l| l.ends_with("Counting at: 3")));
}

#[tokio::test]
async fn test_unrecorded_execution_fails_the_task() {
    let store = Arc::new(FaultyStore::new());
    store.fail_insert_handle.store(true, Ordering::SeqCst);
    let harness = TestHarness::with_store(50, store.clone());

    assert!(harness
        .tasks
        .create_task(NewTask::new(TaskType::Small))
        .await
        .is_err());

    let tasks = harness.tasks.list_tasks().await.unwrap();
    assert_eq!(tasks.len(), 1);
    let task_id = tasks[0].task_id;
    assert_eq!(harness.task(task_id).await.status, TaskStatus::Failed);

    harness.wait_idle().await;
    let task = harness.task(task_id).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.step, 1);
    assert!(harness.context().handles.history(task_id).await.unwrap().is_empty());
}
