//! # Job Controller
//!
//! Lifecycle of jobs and their conditions. Time conditions own a recurring
//! schedule registration whose enabled flag always mirrors the job's
//! `enabled`: schedules are toggled first and reverted if the job row cannot
//! be written. Deleting a job removes the stopping then the starting
//! condition (with their registrations) before the job row.

use super::job_signals::JobSignalProcessor;
use crate::conditions::{Condition, ConditionEvaluator, ConditionSlot};
use crate::constants::MAX_WRITE_ATTEMPTS;
use crate::error::{Result, TaskRunnerError};
use crate::log_sink::EntityKind;
use crate::logging::{log_error, log_job_operation};
use crate::models::{Job, JobCondition, JobDetail, JobUpdate, NewJob, Task};
use crate::scheduler::{JobSignal, ScheduleId, SignalKind};
use crate::state_machine::{TaskStateMachine, TaskStatus};
use crate::system_context::SystemContext;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct JobController {
    machine: TaskStateMachine,
    signals: JobSignalProcessor,
}

fn signal_for(slot: ConditionSlot, job_id: Uuid) -> JobSignal {
    match slot {
        ConditionSlot::Starting => JobSignal::start(job_id),
        ConditionSlot::Stopping => JobSignal::stop(job_id),
    }
}

impl JobController {
    pub fn new(machine: TaskStateMachine) -> Self {
        let signals = JobSignalProcessor::new(machine.clone());
        Self { machine, signals }
    }

    pub fn context(&self) -> &Arc<SystemContext> {
        self.machine.context()
    }

    pub fn signals(&self) -> &JobSignalProcessor {
        &self.signals
    }

    pub fn task_state_machine(&self) -> &TaskStateMachine {
        &self.machine
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Job> {
        self.context()
            .store
            .get_job(job_id)
            .await?
            .ok_or(TaskRunnerError::JobNotFound(job_id))
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        Ok(self.context().store.list_jobs().await?)
    }

    /// Validate, insert the job with its conditions and provision schedules.
    #[instrument(skip(self, new_job), fields(name = %new_job.name))]
    pub async fn create_job(&self, new_job: NewJob) -> Result<Job> {
        let rules = self.context().config.scheduler.condition_rules();
        let conditions: Vec<(ConditionSlot, Condition)> = [
            (ConditionSlot::Starting, new_job.starting_condition.clone()),
            (ConditionSlot::Stopping, new_job.stopping_condition.clone()),
        ]
        .into_iter()
        .filter_map(|(slot, condition)| condition.map(|c| (slot, c)))
        .collect();

        for (slot, condition) in &conditions {
            condition.validate(*slot, &rules)?;
        }

        let store = &self.context().store;
        let job = store.insert_job(&new_job.into_job()).await?;
        for (slot, condition) in conditions {
            let row = JobCondition::new(job.job_id, slot, condition);
            if let Err(e) = store.insert_condition(&row).await {
                self.discard_partial_job(job.job_id).await;
                return Err(e.into());
            }
        }

        let job = self.provision(job.job_id).await?;
        log_job_operation("create", job.job_id, Some(&job.name), enabled_label(&job), None);
        self.job_log(&job, &format!("Created {job}"));
        Ok(job)
    }

    async fn discard_partial_job(&self, job_id: Uuid) {
        let store = &self.context().store;
        match store.conditions_for_job(job_id).await {
            Ok(conditions) => {
                for condition in conditions {
                    if let Err(e) = store.delete_condition(condition.condition_id).await {
                        warn!(
                            job_id = %job_id,
                            condition_id = %condition.condition_id,
                            error = %e,
                            "Could not remove condition of partially created job"
                        );
                    }
                }
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Could not list conditions of partially created job");
            }
        }
        if let Err(e) = store.delete_job(job_id).await {
            log_error("job_controller", "create", &e.to_string(), Some(&job_id.to_string()));
        }
    }

    /// Register any time condition that has no live registration yet, with
    /// `enabled` mirroring the job. Safe to call repeatedly.
    #[instrument(skip(self))]
    pub async fn provision(&self, job_id: Uuid) -> Result<Job> {
        let job = self.get_job(job_id).await?;
        let scheduler = &self.context().scheduler;

        for condition in job.conditions() {
            let Some(spec) = condition.condition.schedule() else {
                continue;
            };
            let registered = condition
                .schedule_id
                .is_some_and(|id| scheduler.is_enabled(id).is_some());
            if registered {
                continue;
            }

            let schedule_id =
                scheduler.register_recurring(spec, signal_for(condition.slot, job_id), job.enabled)?;
            let mut updated = condition.clone();
            updated.schedule_id = Some(schedule_id);
            if let Err(e) = self.context().store.update_condition(&updated).await {
                scheduler.unregister(schedule_id);
                return Err(e.into());
            }
            debug!(
                job_id = %job_id,
                slot = %condition.slot,
                schedule_id = %schedule_id,
                enabled = job.enabled,
                "Provisioned schedule"
            );
        }

        self.get_job(job_id).await
    }

    /// Re-register every time condition; the in-process scheduler keeps no
    /// registrations across restarts. Returns the number of jobs provisioned.
    pub async fn restore_schedules(&self) -> Result<usize> {
        let jobs = self.list_jobs().await?;
        let mut restored = 0;
        for job in jobs {
            if job.conditions().any(|c| c.condition.schedule().is_some()) {
                self.provision(job.job_id).await?;
                restored += 1;
            }
        }
        info!(restored, "Schedules restored");
        Ok(restored)
    }

    #[instrument(skip(self))]
    pub async fn pause_job(&self, job_id: Uuid) -> Result<Job> {
        self.set_enabled(job_id, false).await
    }

    #[instrument(skip(self))]
    pub async fn resume_job(&self, job_id: Uuid) -> Result<Job> {
        self.set_enabled(job_id, true).await
    }

    async fn set_enabled(&self, job_id: Uuid, enabled: bool) -> Result<Job> {
        let context = self.context();
        let _guard = context.job_locks.acquire(job_id).await;

        let job = self.get_job(job_id).await?;
        if job.enabled == enabled {
            return Ok(job);
        }

        let schedules = schedule_ids(&job);
        for id in &schedules {
            context.scheduler.set_enabled(*id, enabled)?;
        }

        match self.write_job(job_id, |job| job.enabled = enabled).await {
            Ok(job) => {
                let operation = if enabled { "resume" } else { "pause" };
                log_job_operation(operation, job_id, Some(&job.name), enabled_label(&job), None);
                self.job_log(&job, &format!("Job {}", if enabled { "resumed" } else { "paused" }));
                Ok(job)
            }
            Err(e) => {
                for id in &schedules {
                    if let Err(revert) = context.scheduler.set_enabled(*id, !enabled) {
                        warn!(job_id = %job_id, schedule_id = %id, error = %revert, "Could not revert schedule");
                    }
                }
                Err(e)
            }
        }
    }

    /// Edit name, task type, continue mode or owner.
    #[instrument(skip(self, update))]
    pub async fn update_job(&self, job_id: Uuid, update: JobUpdate) -> Result<Job> {
        let _guard = self.context().job_locks.acquire(job_id).await;
        let job = self
            .write_job(job_id, |job| {
                if let Some(name) = &update.name {
                    job.name = name.clone();
                }
                if let Some(task_type) = update.task_type {
                    job.task_type = task_type;
                }
                if let Some(continue_mode) = update.continue_mode {
                    job.continue_mode = continue_mode;
                }
                if let Some(owner) = &update.owner {
                    job.owner = owner.clone();
                }
            })
            .await?;
        log_job_operation("update", job_id, Some(&job.name), enabled_label(&job), None);
        Ok(job)
    }

    /// Replace (or clear) the condition in one slot, unregistering the old
    /// schedule and provisioning the new one.
    #[instrument(skip(self, condition))]
    pub async fn set_condition(
        &self,
        job_id: Uuid,
        slot: ConditionSlot,
        condition: Option<Condition>,
    ) -> Result<Job> {
        if let Some(condition) = &condition {
            condition.validate(slot, &self.context().config.scheduler.condition_rules())?;
        }

        {
            let _guard = self.context().job_locks.acquire(job_id).await;
            let job = self.get_job(job_id).await?;
            let existing = match slot {
                ConditionSlot::Starting => job.starting_condition,
                ConditionSlot::Stopping => job.stopping_condition,
            };
            if let Some(existing) = existing {
                self.remove_condition(&existing).await?;
            }
            if let Some(condition) = condition {
                self.context()
                    .store
                    .insert_condition(&JobCondition::new(job_id, slot, condition))
                    .await?;
            }
        }

        self.provision(job_id).await
    }

    async fn remove_condition(&self, condition: &JobCondition) -> Result<()> {
        if let Some(id) = condition.schedule_id {
            self.context().scheduler.unregister(id);
        }
        self.context()
            .store
            .delete_condition(condition.condition_id)
            .await?;
        Ok(())
    }

    /// Delete the stopping and starting conditions, the job's tasks, the job
    /// row and its logs. Returns false when the job did not exist.
    #[instrument(skip(self))]
    pub async fn delete_job(&self, job_id: Uuid) -> Result<bool> {
        let context = self.context();
        {
            let _guard = context.job_locks.acquire(job_id).await;
            let Some(job) = context.store.get_job(job_id).await? else {
                return Ok(false);
            };

            for condition in [&job.stopping_condition, &job.starting_condition]
                .into_iter()
                .flatten()
            {
                self.remove_condition(condition).await?;
            }

            for task in context.store.tasks_for_job(job_id).await? {
                self.machine.delete_task(task.task_id).await?;
            }

            context.store.delete_job(job_id).await?;
            if let Err(e) = context.log_sink.purge_entity(EntityKind::Job, job_id) {
                warn!(job_id = %job_id, error = %e, "Could not purge job logs");
            }
            log_job_operation("delete", job_id, Some(&job.name), "DELETED", None);
        }

        context.job_locks.remove(&job_id);
        Ok(true)
    }

    /// `finished_at` of the most recently finished task.
    pub async fn last_run(&self, job_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        let tasks = self.context().store.tasks_for_job(job_id).await?;
        Ok(last_finished(&tasks))
    }

    pub async fn job_detail(&self, job_id: Uuid) -> Result<JobDetail> {
        let job = self.get_job(job_id).await?;
        let tasks = self.context().store.tasks_for_job(job_id).await?;
        let last_run = last_finished(&tasks);
        Ok(JobDetail {
            job,
            last_run,
            tasks,
        })
    }

    /// Deliver scheduler signals to the signal processor until `shutdown`
    /// fires or the channel closes. Failures are logged, never returned.
    pub fn spawn_signal_listener(
        &self,
        mut receiver: mpsc::UnboundedReceiver<JobSignal>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let signals = self.signals.clone();
        tokio::spawn(async move {
            info!("📡 Job signal listener started");
            loop {
                let signal = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    signal = receiver.recv() => match signal {
                        Some(signal) => signal,
                        None => break,
                    },
                };

                match signals.handle(signal).await {
                    Ok(outcome) => debug!(job_id = %signal.job_id, kind = %signal.kind, ?outcome, "Signal handled"),
                    Err(e) => log_error(
                        "job_controller",
                        match signal.kind {
                            SignalKind::Start => "on_start_signal",
                            SignalKind::Stop => "on_stop_signal",
                        },
                        &e.to_string(),
                        Some(&signal.job_id.to_string()),
                    ),
                }
            }
            info!("Job signal listener stopped");
        })
    }

    /// Version-checked read-modify-write of the job row.
    async fn write_job<F>(&self, job_id: Uuid, mutate: F) -> Result<Job>
    where
        F: Fn(&mut Job) + Send,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let mut job = self.get_job(job_id).await?;
            mutate(&mut job);
            job.updated_at = Utc::now();
            match self.context().store.update_job(&job).await {
                Ok(written) => return Ok(written),
                Err(e) if e.is_conflict() => {
                    debug!(job_id = %job_id, attempt, "Concurrent job modification; retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(TaskRunnerError::Internal(format!(
            "Gave up after {MAX_WRITE_ATTEMPTS} conflicting writes to job {job_id}"
        )))
    }

    fn job_log(&self, job: &Job, message: &str) {
        let written = self
            .context()
            .log_sink
            .open(EntityKind::Job, job.job_id)
            .and_then(|log| log.info(message));
        if let Err(e) = written {
            warn!(job_id = %job.job_id, error = %e, "Could not write job log");
        }
    }
}

fn last_finished(tasks: &[Task]) -> Option<DateTime<Utc>> {
    tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Finished)
        .filter_map(|task| task.finished_at)
        .max()
}

fn schedule_ids(job: &Job) -> Vec<ScheduleId> {
    job.conditions().filter_map(|c| c.schedule_id).collect()
}

fn enabled_label(job: &Job) -> &'static str {
    if job.enabled {
        "ENABLED"
    } else {
        "DISABLED"
    }
}
