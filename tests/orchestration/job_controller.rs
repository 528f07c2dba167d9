use crate::common::faulty_store::FaultyStore;
use crate::common::{wait_until, TestHarness};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use taskrunner_core::conditions::{Condition, ConditionError, ConditionSlot, CronSpec};
use taskrunner_core::database::PersistenceError;
use taskrunner_core::error::TaskRunnerError;
use taskrunner_core::models::{Job, JobUpdate, NewJob, TaskType};
use taskrunner_core::orchestration::JobController;
use taskrunner_core::scheduler::{JobSignal, ScheduleId, SignalKind};
use taskrunner_core::state_machine::{TaskStateMachine, TaskStatus};
use taskrunner_core::system_context::SystemContext;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn windowed(name: &str) -> NewJob {
    NewJob::new(name, TaskType::Medium)
        .starting_when(Condition::time(CronSpec::daily_at(8, 0)))
        .stopping_when(Condition::time(CronSpec::daily_at(18, 30)))
}

fn schedule_ids(job: &Job) -> Vec<ScheduleId> {
    job.conditions().filter_map(|c| c.schedule_id).collect()
}

#[tokio::test]
async fn test_create_job_provisions_time_conditions() {
    let harness = TestHarness::new(0);
    let job = harness.jobs.create_job(windowed("window")).await.unwrap();

    let ids = schedule_ids(&job);
    assert_eq!(ids.len(), 2);

    let scheduler = &harness.parts.scheduler;
    let start = scheduler
        .entry(job.starting_condition.as_ref().unwrap().schedule_id.unwrap())
        .unwrap();
    assert_eq!(start.signal, JobSignal::start(job.job_id));
    assert!(start.enabled);
    assert!(start.next_tick.is_some());

    let stop = scheduler
        .entry(job.stopping_condition.as_ref().unwrap().schedule_id.unwrap())
        .unwrap();
    assert_eq!(stop.signal.kind, SignalKind::Stop);
    assert_eq!(stop.spec, CronSpec::daily_at(18, 30));
}

#[tokio::test]
async fn test_schedule_enablement_mirrors_job() {
    let harness = TestHarness::new(0);
    let scheduler = Arc::clone(&harness.parts.scheduler);

    let dormant = harness
        .jobs
        .create_job(windowed("dormant").disabled())
        .await
        .unwrap();
    for id in schedule_ids(&dormant) {
        assert_eq!(scheduler.entry(id).map(|e| e.enabled), Some(false));
    }

    let job = harness.jobs.create_job(windowed("active")).await.unwrap();
    let paused = harness.jobs.pause_job(job.job_id).await.unwrap();
    assert!(!paused.enabled);
    for id in schedule_ids(&paused) {
        assert_eq!(scheduler.entry(id).map(|e| e.enabled), Some(false));
    }

    // pausing twice changes nothing
    let again = harness.jobs.pause_job(job.job_id).await.unwrap();
    assert_eq!(again.version, paused.version);

    let resumed = harness.jobs.resume_job(job.job_id).await.unwrap();
    assert!(resumed.enabled);
    for id in schedule_ids(&resumed) {
        assert_eq!(scheduler.entry(id).map(|e| e.enabled), Some(true));
    }
}

#[tokio::test]
async fn test_invalid_conditions_are_rejected() {
    let harness = TestHarness::new(0);

    let wildcard = harness
        .jobs
        .create_job(
            NewJob::new("every-minute", TaskType::Small)
                .starting_when(Condition::time(CronSpec::default())),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        wildcard,
        TaskRunnerError::InvalidCondition(ConditionError::WildcardMinute)
    ));

    let out_of_range = harness
        .jobs
        .create_job(
            NewJob::new("bad-hour", TaskType::Small)
                .starting_when(Condition::time(CronSpec::daily_at(25, 0))),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        out_of_range,
        TaskRunnerError::InvalidCondition(ConditionError::InvalidField { field: "hour", .. })
    ));

    let records_as_start = harness
        .jobs
        .create_job(
            NewJob::new("records-start", TaskType::Small)
                .starting_when(Condition::max_records(10)),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        records_as_start,
        TaskRunnerError::InvalidCondition(ConditionError::UnsupportedSlot { .. })
    ));

    assert!(harness.jobs.list_jobs().await.unwrap().is_empty());
    assert!(harness.parts.scheduler.is_empty());
}

#[tokio::test]
async fn test_wildcard_minute_allowed_by_config() {
    let harness = TestHarness::with_config(0, |config| {
        config.scheduler.allow_wildcard_minute = true;
    });

    let job = harness
        .jobs
        .create_job(
            NewJob::new("every-minute", TaskType::Small)
                .starting_when(Condition::time(CronSpec::default())),
        )
        .await
        .unwrap();
    assert_eq!(schedule_ids(&job).len(), 1);
}

#[tokio::test]
async fn test_job_names_are_unique() {
    let harness = TestHarness::new(0);
    harness
        .jobs
        .create_job(NewJob::new("nightly", TaskType::Small))
        .await
        .unwrap();

    let err = harness
        .jobs
        .create_job(NewJob::new("nightly", TaskType::Large))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TaskRunnerError::Persistence(PersistenceError::UniqueViolation { .. })
    ));
}

#[tokio::test]
async fn test_update_job_fields() {
    let harness = TestHarness::new(0);
    let job = harness
        .jobs
        .create_job(NewJob::new("editable", TaskType::Small))
        .await
        .unwrap();

    let updated = harness
        .jobs
        .update_job(
            job.job_id,
            JobUpdate {
                name: Some("edited".to_string()),
                task_type: Some(TaskType::Large),
                continue_mode: Some(true),
                owner: Some(Some("data-team".to_string())),
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.name, "edited");
    assert_eq!(updated.task_type, TaskType::Large);
    assert!(updated.continue_mode);
    assert_eq!(updated.owner.as_deref(), Some("data-team"));
    assert!(updated.version > job.version);
}

#[tokio::test]
async fn test_set_condition_replaces_registration() {
    let harness = TestHarness::new(0);
    let job = harness.jobs.create_job(windowed("reschedule")).await.unwrap();
    let old_start = job.starting_condition.as_ref().unwrap().schedule_id.unwrap();

    let updated = harness
        .jobs
        .set_condition(
            job.job_id,
            ConditionSlot::Starting,
            Some(Condition::time(CronSpec::daily_at(9, 15).with_day_of_week(1))),
        )
        .await
        .unwrap();
    let new_start = updated.starting_condition.as_ref().unwrap().schedule_id.unwrap();

    assert_ne!(old_start, new_start);
    assert!(harness.parts.scheduler.entry(old_start).is_none());
    assert!(harness.parts.scheduler.entry(new_start).is_some());
    assert_eq!(harness.parts.scheduler.len(), 2);

    let cleared = harness
        .jobs
        .set_condition(job.job_id, ConditionSlot::Stopping, None)
        .await
        .unwrap();
    assert!(cleared.stopping_condition.is_none());
    assert_eq!(harness.parts.scheduler.len(), 1);

    let capped = harness
        .jobs
        .set_condition(job.job_id, ConditionSlot::Stopping, Some(Condition::max_records(50)))
        .await
        .unwrap();
    assert_eq!(capped.record_limit(), Some(50));
    assert_eq!(harness.parts.scheduler.len(), 1);
}

#[tokio::test]
async fn test_delete_job_removes_conditions_schedules_and_tasks() {
    let harness = TestHarness::new(0);
    let job = harness.jobs.create_job(windowed("doomed")).await.unwrap();
    let condition_ids: Vec<Uuid> = job.conditions().map(|c| c.condition_id).collect();

    let task_id = match harness.jobs.signals().on_start_signal(job.job_id).await.unwrap() {
        taskrunner_core::orchestration::SignalOutcome::Created { task_id } => task_id,
        other => panic!("unexpected outcome {other:?}"),
    };
    harness.wait_for_status(task_id, TaskStatus::Finished).await;

    assert!(harness.jobs.delete_job(job.job_id).await.unwrap());

    assert!(harness.parts.scheduler.is_empty());
    let store = &harness.context().store;
    for id in condition_ids {
        assert!(store.get_condition(id).await.unwrap().is_none());
    }
    assert!(store.tasks_for_job(job.job_id).await.unwrap().is_empty());
    assert!(matches!(
        harness.jobs.get_job(job.job_id).await,
        Err(TaskRunnerError::JobNotFound(_))
    ));
    assert!(!harness
        .dir
        .path()
        .join("jobs")
        .join(job.job_id.to_string())
        .exists());

    assert!(!harness.jobs.delete_job(job.job_id).await.unwrap());
}

#[tokio::test]
async fn test_job_detail_lists_tasks_newest_first() {
    let harness = TestHarness::new(0);
    let job = harness
        .jobs
        .create_job(NewJob::new("history", TaskType::Empty))
        .await
        .unwrap();
    let signals = harness.jobs.signals();

    let mut created = Vec::new();
    for _ in 0..3 {
        if let taskrunner_core::orchestration::SignalOutcome::Created { task_id } =
            signals.on_start_signal(job.job_id).await.unwrap()
        {
            harness.wait_for_status(task_id, TaskStatus::Finished).await;
            created.push(task_id);
        }
    }
    assert_eq!(created.len(), 3);

    let detail = harness.jobs.job_detail(job.job_id).await.unwrap();
    let listed: Vec<Uuid> = detail.tasks.iter().map(|t| t.task_id).collect();
    created.reverse();
    assert_eq!(listed, created);
    assert!(detail.last_run.is_some());
}

#[tokio::test]
async fn test_restore_schedules_on_fresh_scheduler() {
    let harness = TestHarness::new(0);
    let job = harness.jobs.create_job(windowed("survivor")).await.unwrap();
    let dormant = harness
        .jobs
        .create_job(windowed("survivor-off").disabled())
        .await
        .unwrap();

    // a second process over the same store starts with no registrations
    let restarted = SystemContext::with_store(
        harness.context().config.clone(),
        Arc::clone(&harness.context().store),
    );
    let controller = JobController::new(TaskStateMachine::new(Arc::clone(&restarted.context)));
    assert!(restarted.scheduler.is_empty());

    assert_eq!(controller.restore_schedules().await.unwrap(), 2);
    assert_eq!(restarted.scheduler.len(), 4);

    let restored = controller.get_job(job.job_id).await.unwrap();
    for id in schedule_ids(&restored) {
        assert_eq!(restarted.scheduler.entry(id).map(|e| e.enabled), Some(true));
    }
    let restored = controller.get_job(dormant.job_id).await.unwrap();
    for id in schedule_ids(&restored) {
        assert_eq!(restarted.scheduler.entry(id).map(|e| e.enabled), Some(false));
    }

    // provisioning again registers nothing new
    controller.restore_schedules().await.unwrap();
    assert_eq!(restarted.scheduler.len(), 4);
}

#[tokio::test]
async fn test_signal_listener_delivers_signals() {
    let harness = TestHarness::new(0);
    let job = harness
        .jobs
        .create_job(NewJob::new("listened", TaskType::Small))
        .await
        .unwrap();

    let (sender, receiver) = mpsc::unbounded_channel();
    let shutdown = CancellationToken::new();
    let listener = harness.jobs.spawn_signal_listener(receiver, shutdown.clone());

    sender.send(JobSignal::start(job.job_id)).unwrap();
    let store = Arc::clone(&harness.context().store);
    wait_until(|| {
        let store = Arc::clone(&store);
        async move { !store.tasks_for_job(job.job_id).await.unwrap().is_empty() }
    })
    .await;

    shutdown.cancel();
    listener.await.unwrap();
    harness.wait_idle().await;
}

#[tokio::test]
async fn test_failed_condition_insert_discards_the_job() {
    let store = Arc::new(FaultyStore::new());
    let harness = TestHarness::with_store(0, store.clone());

    store.condition_inserts_allowed.store(1, Ordering::SeqCst);
    assert!(harness.jobs.create_job(windowed("half-made")).await.is_err());
    assert!(harness.jobs.list_jobs().await.unwrap().is_empty());

    // a condition that cannot be removed keeps the job row referenced
    store.condition_inserts_allowed.store(1, Ordering::SeqCst);
    store.fail_delete_condition.store(true, Ordering::SeqCst);
    assert!(harness.jobs.create_job(windowed("stuck")).await.is_err());

    let jobs = harness.jobs.list_jobs().await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].name, "stuck");
    assert_eq!(jobs[0].conditions().count(), 1);
    assert!(jobs[0].conditions().all(|c| c.schedule_id.is_none()));
}
