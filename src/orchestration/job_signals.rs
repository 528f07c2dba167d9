//! # Job Signal Processing
//!
//! Entry points fired by conditions: a schedule tick delivers start/stop
//! signals, and a task reaching its record limit raises the stop signal from
//! inside its workload. Signals for one job are handled one at a time under
//! the job's lock; a signal that conflicts with the job's active task leaves
//! that task untouched and is dropped with a log entry.

use crate::error::Result;
use crate::log_sink::EntityKind;
use crate::logging::log_job_operation;
use crate::models::{Job, NewTask, Task};
use crate::scheduler::{JobSignal, SignalKind};
use crate::state_machine::{TaskStateMachine, TaskStatus, TransitionOutcome};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// What a signal did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// A new task was created (and launched)
    Created { task_id: Uuid },
    Resumed { task_id: Uuid },
    Paused { task_id: Uuid },
    Stopped { task_id: Uuid },
    /// The latest task was left as it was
    Skipped { task_id: Uuid, status: TaskStatus },
    /// Stop signal for a job without tasks
    NoActiveTask,
    JobDisabled,
    JobNotFound,
}

#[derive(Debug, Clone)]
pub struct JobSignalProcessor {
    machine: TaskStateMachine,
}

impl JobSignalProcessor {
    pub fn new(machine: TaskStateMachine) -> Self {
        Self { machine }
    }

    pub async fn handle(&self, signal: JobSignal) -> Result<SignalOutcome> {
        match signal.kind {
            SignalKind::Start => self.on_start_signal(signal.job_id).await,
            SignalKind::Stop => self.on_stop_signal(signal.job_id).await,
        }
    }

    /// Begin a new cycle, or continue the paused one.
    #[instrument(skip(self))]
    pub async fn on_start_signal(&self, job_id: Uuid) -> Result<SignalOutcome> {
        let context = self.machine.context();
        let _guard = context.job_locks.acquire(job_id).await;

        let job = match self.enabled_job(job_id, SignalKind::Start).await? {
            Ok(job) => job,
            Err(outcome) => return Ok(outcome),
        };

        let latest = context.store.latest_task_for_job(job_id).await?;
        let outcome = match latest {
            None => self.create_cycle_task(&job).await?,
            Some(task) => match task.status {
                TaskStatus::Finished => self.create_cycle_task(&job).await?,
                TaskStatus::Paused | TaskStatus::Stopped if job.continue_mode => {
                    match self.machine.resume(task.task_id).await? {
                        TransitionOutcome::Applied { .. } => SignalOutcome::Resumed {
                            task_id: task.task_id,
                        },
                        other => SignalOutcome::Skipped {
                            task_id: task.task_id,
                            status: other.status(),
                        },
                    }
                }
                // a hard stop closes the cycle
                TaskStatus::Stopped => self.create_cycle_task(&job).await?,
                status => {
                    info!(
                        job_id = %job_id,
                        task_id = %task.task_id,
                        status = %status,
                        "Start signal dropped; latest task left untouched"
                    );
                    SignalOutcome::Skipped {
                        task_id: task.task_id,
                        status,
                    }
                }
            },
        };

        self.record(&job, SignalKind::Start, outcome);
        Ok(outcome)
    }

    /// Halt the current task: pause it in continue mode, stop it otherwise.
    #[instrument(skip(self))]
    pub async fn on_stop_signal(&self, job_id: Uuid) -> Result<SignalOutcome> {
        let context = self.machine.context();
        let _guard = context.job_locks.acquire(job_id).await;

        let job = match self.enabled_job(job_id, SignalKind::Stop).await? {
            Ok(job) => job,
            Err(outcome) => return Ok(outcome),
        };

        let Some(task) = context.store.latest_task_for_job(job_id).await? else {
            debug!(job_id = %job_id, "Stop signal for job without tasks");
            self.record(&job, SignalKind::Stop, SignalOutcome::NoActiveTask);
            return Ok(SignalOutcome::NoActiveTask);
        };

        let transition = if job.continue_mode {
            self.machine.pause(task.task_id).await?
        } else {
            self.machine.stop(task.task_id).await?
        };

        let outcome = match transition {
            TransitionOutcome::Applied {
                to: TaskStatus::Paused,
                ..
            } => SignalOutcome::Paused {
                task_id: task.task_id,
            },
            TransitionOutcome::Applied { .. } => SignalOutcome::Stopped {
                task_id: task.task_id,
            },
            other => {
                info!(
                    job_id = %job_id,
                    task_id = %task.task_id,
                    status = %other.status(),
                    "Stop signal dropped; latest task left untouched"
                );
                SignalOutcome::Skipped {
                    task_id: task.task_id,
                    status: other.status(),
                }
            }
        };

        self.record(&job, SignalKind::Stop, outcome);
        Ok(outcome)
    }

    /// `Err(outcome)` when the signal must be dropped.
    async fn enabled_job(
        &self,
        job_id: Uuid,
        kind: SignalKind,
    ) -> Result<std::result::Result<Job, SignalOutcome>> {
        match self.machine.context().store.get_job(job_id).await? {
            None => {
                warn!(job_id = %job_id, signal = %kind, "Signal for unknown job dropped");
                Ok(Err(SignalOutcome::JobNotFound))
            }
            Some(job) if !job.enabled => {
                info!(job_id = %job_id, signal = %kind, "Signal for disabled job dropped");
                Ok(Err(SignalOutcome::JobDisabled))
            }
            Some(job) => Ok(Ok(job)),
        }
    }

    async fn create_cycle_task(&self, job: &Job) -> Result<SignalOutcome> {
        let task: Task = self
            .machine
            .create_task(
                NewTask::new(job.task_type)
                    .for_job(job.job_id)
                    .with_owner(job.owner.clone())
                    .with_parent_task(job.parent_task_id)
                    .with_max_records(job.record_limit()),
            )
            .await?;
        Ok(SignalOutcome::Created {
            task_id: task.task_id,
        })
    }

    /// Structured log plus a line in the job's own log folder.
    fn record(&self, job: &Job, kind: SignalKind, outcome: SignalOutcome) {
        let details = format!("{outcome:?}");
        log_job_operation(
            &format!("{kind}_signal"),
            job.job_id,
            Some(&job.name),
            if job.enabled { "ENABLED" } else { "DISABLED" },
            Some(&details),
        );

        let written = self
            .machine
            .context()
            .log_sink
            .open(EntityKind::Job, job.job_id)
            .and_then(|log| log.info(&format!("{} signal: {details}", signal_label(kind))));
        if let Err(e) = written {
            warn!(job_id = %job.job_id, error = %e, "Could not write job log");
        }
    }
}

fn signal_label(kind: SignalKind) -> &'static str {
    match kind {
        SignalKind::Start => "Start",
        SignalKind::Stop => "Stop",
    }
}
