//! # Orphan Reconciliation
//!
//! After a crash, tasks can be left STARTING or RUNNING with a handle no
//! worker is executing. The sweep finds them and resolves each one according
//! to the configured [`OrphanPolicy`]: FAILED by default, or PAUSED so the
//! task can be resumed from its checkpoint.

use crate::config::OrphanPolicy;
use crate::constants::status_groups;
use crate::error::Result;
use crate::logging::log_task_operation;
use crate::models::Task;
use crate::state_machine::{TaskStateMachine, TaskStatus, TransitionOutcome};
use tracing::{info, instrument, warn};

/// Summary of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Active tasks examined
    pub inspected: usize,
    pub failed: usize,
    pub paused: usize,
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    machine: TaskStateMachine,
    policy: OrphanPolicy,
}

impl Reconciler {
    pub fn new(machine: TaskStateMachine) -> Self {
        let policy = machine.context().config.reconciliation.orphan_policy;
        Self { machine, policy }
    }

    pub fn with_policy(mut self, policy: OrphanPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[instrument(skip(self), fields(policy = ?self.policy))]
    pub async fn sweep(&self) -> Result<ReconcileReport> {
        let context = self.machine.context();
        let active = context
            .store
            .tasks_with_status(&status_groups::ACTIVE)
            .await?;

        let mut report = ReconcileReport {
            inspected: active.len(),
            ..Default::default()
        };

        for task in active {
            if !self.is_orphaned(&task).await? {
                continue;
            }

            match self.resolve(&task).await? {
                TransitionOutcome::Applied {
                    to: TaskStatus::Failed,
                    ..
                } => report.failed += 1,
                TransitionOutcome::Applied {
                    to: TaskStatus::Paused,
                    ..
                } => report.paused += 1,
                outcome => {
                    info!(task_id = %task.task_id, ?outcome, "Orphan moved on before it was resolved");
                }
            }
        }

        info!(
            inspected = report.inspected,
            failed = report.failed,
            paused = report.paused,
            "Reconciliation sweep complete"
        );
        Ok(report)
    }

    async fn is_orphaned(&self, task: &Task) -> Result<bool> {
        let handles = &self.machine.context().handles;
        Ok(match handles.current(task.task_id).await? {
            Some(handle) => !handles.is_live(&handle),
            None => true,
        })
    }

    async fn resolve(&self, task: &Task) -> Result<TransitionOutcome> {
        warn!(
            task_id = %task.task_id,
            status = %task.status,
            step = task.step,
            "Orphaned task without a live execution"
        );

        let outcome = match (self.policy, task.status) {
            (OrphanPolicy::Pause, TaskStatus::Running) => self.machine.pause(task.task_id).await?,
            // never started: nothing to resume from
            _ => {
                self.machine
                    .fail(task.task_id, "Execution lost; no live worker owns this task")
                    .await?
            }
        };

        log_task_operation(
            "reconcile",
            task.task_id,
            Some(task.status.as_str()),
            outcome.status().as_str(),
            None,
        );
        Ok(outcome)
    }
}
