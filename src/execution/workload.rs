//! The simulated workload.
//!
//! A run marks its task RUNNING, then counts from the task's checkpointed
//! `step` up to the type's maximum, waiting one unit of work per increment and
//! checkpointing after every increment. Checkpoints are only persisted while
//! the run still owns the task (status RUNNING and current handle), so a slow
//! execution that was paused or superseded can never overwrite newer state.

use crate::error::TaskRunnerError;
use crate::execution::{WorkloadError, WorkloadOutcome};
use crate::log_sink::EntityKind;
use crate::models::ExternalId;
use crate::orchestration::{JobSignalProcessor, SignalOutcome};
use crate::state_machine::{Checkpoint, TaskStateMachine};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Error message raised by the FAILURE task type.
pub const FORCED_FAILURE_MESSAGE: &str = "Max Count cannot be less than 0";

pub struct SimulatedWorkload {
    machine: TaskStateMachine,
    task_id: Uuid,
    continue_mode: bool,
    unit_delay: Duration,
}

impl std::fmt::Debug for SimulatedWorkload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedWorkload")
            .field("task_id", &self.task_id)
            .field("continue_mode", &self.continue_mode)
            .field("unit_delay", &self.unit_delay)
            .finish()
    }
}

impl SimulatedWorkload {
    pub fn new(machine: TaskStateMachine, task_id: Uuid, continue_mode: bool) -> Self {
        let unit_delay = machine.context().config.dispatcher.unit_delay();
        Self {
            machine,
            task_id,
            continue_mode,
            unit_delay,
        }
    }

    /// Execute the workload. `execution` is the dispatcher's id for this run,
    /// `None` when running inline.
    #[instrument(skip(self, cancellation), fields(task_id = %self.task_id, continue_mode = self.continue_mode))]
    pub async fn run(
        self,
        execution: Option<ExternalId>,
        cancellation: CancellationToken,
    ) -> Result<WorkloadOutcome, WorkloadError> {
        let log = self
            .machine
            .context()
            .log_sink
            .open(EntityKind::Task, self.task_id)?;

        let Some(task) = self
            .machine
            .mark_running(
                self.task_id,
                self.continue_mode,
                execution.as_ref(),
                log.log_path(),
            )
            .await?
        else {
            debug!("Task moved on before the workload started");
            return Ok(WorkloadOutcome::Superseded);
        };

        log.info(&format!("Starting {} Task", task.task_type.label()))?;
        log.info("Executing Task...")?;

        let Some(max_count) = task.task_type.max_count() else {
            log.error(FORCED_FAILURE_MESSAGE)?;
            return Err(WorkloadError::ForcedFailure(
                FORCED_FAILURE_MESSAGE.to_string(),
            ));
        };

        let mut step = task.step;
        let mut record_limit = task.max_records.zip(task.job_id);
        if self.continue_mode {
            // a resumed run already raised the signal for the steps behind it
            record_limit = record_limit.filter(|(limit, _)| step < *limit);
        }

        loop {
            if let Some((limit, job_id)) = record_limit.filter(|(limit, _)| step >= *limit) {
                record_limit = None;
                log.info(&format!("Max records reached: {limit}"))?;
                if self.raise_stop_signal(job_id, execution.is_none()).await? {
                    return Ok(WorkloadOutcome::RecordLimitReached);
                }
                log.warning("Stop signal dropped; counting to completion")?;
            }
            if step >= max_count {
                break;
            }

            if self.wait_one_unit(&cancellation).await {
                log.warning("Execution interrupted")?;
                return Ok(WorkloadOutcome::Interrupted);
            }

            step += 1;
            if let Checkpoint::Discarded = self
                .machine
                .checkpoint(self.task_id, execution.as_ref(), step)
                .await?
            {
                debug!(step, "Checkpoint discarded; task no longer owned by this run");
                return Ok(WorkloadOutcome::Superseded);
            }
            log.info(&format!("Counting at: {step}"))?;
        }

        log.info("Done...")?;
        info!(step, "Workload completed");
        Ok(WorkloadOutcome::Completed)
    }

    /// Wait one unit of work. Returns true when termination was requested.
    async fn wait_one_unit(&self, cancellation: &CancellationToken) -> bool {
        if self.unit_delay.is_zero() {
            tokio::task::yield_now().await;
            return cancellation.is_cancelled();
        }

        tokio::select! {
            _ = cancellation.cancelled() => true,
            _ = tokio::time::sleep(self.unit_delay) => false,
        }
    }

    /// Raise the job's stop signal. Returns true when the run must end here,
    /// false when the signal left this task RUNNING.
    async fn raise_stop_signal(&self, job_id: Uuid, inline: bool) -> Result<bool, WorkloadError> {
        if inline {
            return self.raise_stop_signal_detached(job_id).await;
        }

        let outcome = JobSignalProcessor::new(self.machine.clone())
            .on_stop_signal(job_id)
            .await?;
        let halted = halted_task(outcome) == Some(self.task_id);
        debug!(job_id = %job_id, ?outcome, halted, "Stop signal raised at record limit");
        Ok(halted)
    }

    /// An inline run may be nested inside a start signal holding the job
    /// lock, so the signal runs on its own task after this run returns. A
    /// signal that does not halt the task is followed by a direct halt.
    async fn raise_stop_signal_detached(&self, job_id: Uuid) -> Result<bool, WorkloadError> {
        let job = self
            .machine
            .context()
            .store
            .get_job(job_id)
            .await
            .map_err(TaskRunnerError::from)?;
        let Some(job) = job.filter(|job| job.enabled) else {
            info!(job_id = %job_id, "Job disabled or gone; stop signal dropped");
            return Ok(false);
        };

        let machine = self.machine.clone();
        let task_id = self.task_id;
        let continue_mode = job.continue_mode;
        tokio::spawn(async move {
            let outcome = JobSignalProcessor::new(machine.clone())
                .on_stop_signal(job_id)
                .await;
            match outcome {
                Ok(outcome) if halted_task(outcome) == Some(task_id) => return,
                Ok(outcome) => {
                    warn!(job_id = %job_id, task_id = %task_id, ?outcome, "Stop signal from inline run did not halt it");
                }
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "Stop signal from inline run failed");
                }
            }

            let halted = if continue_mode {
                machine.pause(task_id).await
            } else {
                machine.stop(task_id).await
            };
            if let Err(e) = halted {
                warn!(task_id = %task_id, error = %e, "Could not halt inline task at its record limit");
            }
        });
        Ok(true)
    }
}

fn halted_task(outcome: SignalOutcome) -> Option<Uuid> {
    match outcome {
        SignalOutcome::Paused { task_id } | SignalOutcome::Stopped { task_id } => Some(task_id),
        _ => None,
    }
}
