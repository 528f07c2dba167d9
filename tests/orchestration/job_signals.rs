use crate::common::TestHarness;
use taskrunner_core::conditions::{Condition, CronSpec};
use taskrunner_core::models::{NewJob, TaskType};
use taskrunner_core::orchestration::SignalOutcome;
use taskrunner_core::scheduler::JobSignal;
use taskrunner_core::state_machine::TaskStatus;
use uuid::Uuid;

fn created_id(outcome: SignalOutcome) -> Uuid {
    match outcome {
        SignalOutcome::Created { task_id } => task_id,
        other => panic!("expected a new task, got {other:?}"),
    }
}

#[tokio::test]
async fn test_start_signal_creates_task_for_job() {
    let harness = TestHarness::new(5);
    let job = harness
        .jobs
        .create_job(NewJob::new("ingest", TaskType::Large).with_owner("ops"))
        .await
        .unwrap();

    let outcome = harness.jobs.signals().on_start_signal(job.job_id).await.unwrap();
    let task_id = created_id(outcome);

    let task = harness.task(task_id).await;
    assert_eq!(task.job_id, Some(job.job_id));
    assert_eq!(task.task_type, TaskType::Large);
    assert_eq!(task.owner.as_deref(), Some("ops"));
    assert_eq!(task.max_records, None);

    harness.wait_for_step(task_id, 2).await;
    let repeated = harness.jobs.signals().on_start_signal(job.job_id).await.unwrap();
    assert_eq!(
        repeated,
        SignalOutcome::Skipped {
            task_id,
            status: TaskStatus::Running
        }
    );
    assert_eq!(harness.context().store.tasks_for_job(job.job_id).await.unwrap().len(), 1);

    harness.tasks.cancel(task_id).await.unwrap();
    harness.wait_idle().await;
}

#[tokio::test]
async fn test_hard_stop_closes_the_cycle() {
    let harness = TestHarness::new(5);
    let job = harness
        .jobs
        .create_job(NewJob::new("hard-stop", TaskType::Large))
        .await
        .unwrap();
    let signals = harness.jobs.signals();

    let first = created_id(signals.on_start_signal(job.job_id).await.unwrap());
    harness.wait_for_step(first, 2).await;

    let stopped = signals.handle(JobSignal::stop(job.job_id)).await.unwrap();
    assert_eq!(stopped, SignalOutcome::Stopped { task_id: first });
    assert_eq!(harness.task(first).await.status, TaskStatus::Stopped);

    let second = created_id(signals.handle(JobSignal::start(job.job_id)).await.unwrap());
    assert_ne!(first, second);
    assert_eq!(harness.task(first).await.status, TaskStatus::Stopped);

    harness.tasks.cancel(second).await.unwrap();
    harness.wait_idle().await;
}

#[tokio::test]
async fn test_continue_mode_pauses_and_resumes_same_task() {
    let harness = TestHarness::new(5);
    let job = harness
        .jobs
        .create_job(NewJob::new("resumable", TaskType::Large).continuing())
        .await
        .unwrap();
    let signals = harness.jobs.signals();

    let task_id = created_id(signals.on_start_signal(job.job_id).await.unwrap());
    harness.wait_for_step(task_id, 3).await;

    let paused = signals.on_stop_signal(job.job_id).await.unwrap();
    assert_eq!(paused, SignalOutcome::Paused { task_id });
    let checkpoint = harness.task(task_id).await.step;

    let resumed = signals.on_start_signal(job.job_id).await.unwrap();
    assert_eq!(resumed, SignalOutcome::Resumed { task_id });
    let running = harness.wait_for_step(task_id, checkpoint + 1).await;
    assert!(running.step > checkpoint);
    assert_eq!(harness.context().store.tasks_for_job(job.job_id).await.unwrap().len(), 1);

    harness.tasks.cancel(task_id).await.unwrap();
    harness.wait_idle().await;
}

#[tokio::test]
async fn test_record_limit_stops_task() {
    let harness = TestHarness::new(0);
    let job = harness
        .jobs
        .create_job(
            NewJob::new("capped", TaskType::Medium).stopping_when(Condition::max_records(50)),
        )
        .await
        .unwrap();

    let task_id = created_id(harness.jobs.signals().on_start_signal(job.job_id).await.unwrap());
    assert_eq!(harness.task(task_id).await.max_records, Some(50));

    let task = harness.wait_for_status(task_id, TaskStatus::Stopped).await;
    assert_eq!(task.step, 50);
    harness.wait_idle().await;
    assert_eq!(harness.task(task_id).await.status, TaskStatus::Stopped);
}

#[tokio::test]
async fn test_record_limit_in_continue_mode_pauses_then_finishes() {
    let harness = TestHarness::new(0);
    let job = harness
        .jobs
        .create_job(
            NewJob::new("capped-continue", TaskType::Medium)
                .continuing()
                .stopping_when(Condition::max_records(50)),
        )
        .await
        .unwrap();
    let signals = harness.jobs.signals();

    let task_id = created_id(signals.on_start_signal(job.job_id).await.unwrap());
    let paused = harness.wait_for_status(task_id, TaskStatus::Paused).await;
    assert_eq!(paused.step, 50);
    harness.wait_idle().await;

    assert_eq!(
        signals.on_start_signal(job.job_id).await.unwrap(),
        SignalOutcome::Resumed { task_id }
    );
    let finished = harness.wait_for_status(task_id, TaskStatus::Finished).await;
    assert_eq!(finished.step, 1000);
}

#[tokio::test]
async fn test_record_limit_reached_inline() {
    let harness = TestHarness::new(0);
    let job = harness
        .jobs
        .create_job(NewJob::new("inline-cap", TaskType::Small).stopping_when(Condition::max_records(3)))
        .await
        .unwrap();

    // a debug task bound to the job runs on the caller and raises the stop
    // signal itself
    let task = harness
        .tasks
        .create_task(
            taskrunner_core::models::NewTask::new(TaskType::Small)
                .debug()
                .for_job(job.job_id)
                .with_max_records(job.record_limit()),
        )
        .await
        .unwrap();

    let stopped = harness.wait_for_status(task.task_id, TaskStatus::Stopped).await;
    assert_eq!(stopped.step, 3);
}

#[tokio::test]
async fn test_record_limit_of_one_stops_before_counting() {
    let harness = TestHarness::new(0);
    let job = harness
        .jobs
        .create_job(NewJob::new("single", TaskType::Small).stopping_when(Condition::max_records(1)))
        .await
        .unwrap();

    let task_id = created_id(harness.jobs.signals().on_start_signal(job.job_id).await.unwrap());
    let stopped = harness.wait_for_status(task_id, TaskStatus::Stopped).await;
    assert_eq!(stopped.step, 1);
    harness.wait_idle().await;
    assert_eq!(harness.task(task_id).await.status, TaskStatus::Stopped);
}

#[tokio::test]
async fn test_record_limit_on_paused_job_counts_to_completion() {
    let harness = TestHarness::new(50);
    let job = harness
        .jobs
        .create_job(NewJob::new("paused-cap", TaskType::Small).stopping_when(Condition::max_records(3)))
        .await
        .unwrap();

    let task_id = created_id(harness.jobs.signals().on_start_signal(job.job_id).await.unwrap());
    harness.jobs.pause_job(job.job_id).await.unwrap();

    let finished = harness.wait_for_status(task_id, TaskStatus::Finished).await;
    assert_eq!(finished.step, 5);
    harness.wait_idle().await;
    assert_eq!(harness.parts.dispatcher.active_count(), 0);

    let excerpt = harness.tasks.log_excerpt(task_id, 50).await.unwrap();
    assert!(excerpt.iter().any(|l| l.ends_with("Max records reached: 3")));
    assert!(excerpt
        .iter()
        .any(|l| l.ends_with("Stop signal dropped; counting to completion")));
}

#[tokio::test]
async fn test_inline_run_on_disabled_job_counts_to_completion() {
    let harness = TestHarness::new(0);
    let job = harness
        .jobs
        .create_job(
            NewJob::new("inline-dormant", TaskType::Small)
                .disabled()
                .stopping_when(Condition::max_records(3)),
        )
        .await
        .unwrap();

    let task = harness
        .tasks
        .create_task(
            taskrunner_core::models::NewTask::new(TaskType::Small)
                .debug()
                .for_job(job.job_id)
                .with_max_records(job.record_limit()),
        )
        .await
        .unwrap();

    assert_eq!(task.status, TaskStatus::Finished);
    assert_eq!(task.step, 5);
}

#[tokio::test]
async fn test_signals_for_disabled_or_unknown_jobs_are_dropped() {
    let harness = TestHarness::new(0);
    let job = harness
        .jobs
        .create_job(NewJob::new("dormant", TaskType::Small).disabled())
        .await
        .unwrap();
    let signals = harness.jobs.signals();

    assert_eq!(
        signals.on_start_signal(job.job_id).await.unwrap(),
        SignalOutcome::JobDisabled
    );
    assert_eq!(
        signals.on_stop_signal(job.job_id).await.unwrap(),
        SignalOutcome::JobDisabled
    );
    assert!(harness.context().store.tasks_for_job(job.job_id).await.unwrap().is_empty());

    assert_eq!(
        signals.on_start_signal(Uuid::new_v4()).await.unwrap(),
        SignalOutcome::JobNotFound
    );
}

#[tokio::test]
async fn test_stop_signal_without_tasks() {
    let harness = TestHarness::new(0);
    let job = harness
        .jobs
        .create_job(
            NewJob::new("idle", TaskType::Small)
                .stopping_when(Condition::time(CronSpec::daily_at(18, 0))),
        )
        .await
        .unwrap();

    assert_eq!(
        harness.jobs.signals().on_stop_signal(job.job_id).await.unwrap(),
        SignalOutcome::NoActiveTask
    );
}

#[tokio::test]
async fn test_start_after_finished_cycle_creates_new_task() {
    let harness = TestHarness::new(0);
    let job = harness
        .jobs
        .create_job(NewJob::new("daily", TaskType::Small))
        .await
        .unwrap();
    let signals = harness.jobs.signals();

    let first = created_id(signals.on_start_signal(job.job_id).await.unwrap());
    harness.wait_for_status(first, TaskStatus::Finished).await;

    let second = created_id(signals.on_start_signal(job.job_id).await.unwrap());
    assert_ne!(first, second);
    harness.wait_for_status(second, TaskStatus::Finished).await;

    let last_run = harness.jobs.last_run(job.job_id).await.unwrap();
    assert_eq!(last_run, harness.task(second).await.finished_at);
}

#[tokio::test]
async fn test_signals_are_recorded_in_job_log() {
    let harness = TestHarness::new(0);
    let job = harness
        .jobs
        .create_job(NewJob::new("logged", TaskType::Empty))
        .await
        .unwrap();

    harness.jobs.signals().on_start_signal(job.job_id).await.unwrap();

    let folder = harness
        .dir
        .path()
        .join("jobs")
        .join(job.job_id.to_string());
    let contents: String = std::fs::read_dir(&folder)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("info__"))
        .map(|entry| std::fs::read_to_string(entry.path()).unwrap())
        .collect();
    assert!(contents.contains("Created"));
    assert!(contents.to_lowercase().contains("start"));
}
