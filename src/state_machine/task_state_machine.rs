use super::{
    actions::{AppliedTransition, LogTransitionAction, PublishStatusEventAction, StateAction},
    errors::{StateMachineError, StateMachineResult},
    events::TaskEvent,
    guards::{GuardDecision, TransitionGuard},
    states::TaskStatus,
};
use crate::constants::MAX_WRITE_ATTEMPTS;
use crate::execution::{
    DispatchCallbacks, SimulatedWorkload, WorkloadContext, WorkloadError, WorkloadOutcome,
    WorkloadRequest,
};
use crate::log_sink::EntityKind;
use crate::logging::{log_error, log_task_operation};
use crate::models::{ExecutionHandle, ExternalId, NewTask, Task, TaskEdit};
use crate::system_context::SystemContext;
use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// What an operation did to the task.
///
/// Illegal requests are reported as `Rejected` rather than raised, so callers
/// can tell a no-op apart from a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied { from: TaskStatus, to: TaskStatus },
    /// Already in the requested status
    Unchanged { status: TaskStatus },
    /// Not accepted from the current status
    Rejected {
        from: TaskStatus,
        event: &'static str,
    },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// Status the task was left in
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Applied { to, .. } => *to,
            Self::Unchanged { status } => *status,
            Self::Rejected { from, .. } => *from,
        }
    }
}

/// Result of a workload checkpoint
#[derive(Debug, Clone, PartialEq)]
pub enum Checkpoint {
    Written(Task),
    /// The writer no longer owns the task; nothing was persisted
    Discarded,
}

/// Task lifecycle controller.
///
/// Cheap to clone. Control-plane operations on one task are serialized by a
/// per-task lock; every row write is version-checked and retried on conflict
/// so the workload's checkpoints and control-plane writes never lose updates.
#[derive(Clone)]
pub struct TaskStateMachine {
    context: Arc<SystemContext>,
    actions: Arc<Vec<Box<dyn StateAction>>>,
}

impl std::fmt::Debug for TaskStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskStateMachine")
            .field("system_id", &self.context.system_id)
            .field("actions", &self.actions.len())
            .finish()
    }
}

fn stamp_finished(task: &mut Task) {
    task.finished_at = Some(Utc::now());
}

fn stamp_stopped(task: &mut Task) {
    task.stopped_at = Some(Utc::now());
}

impl TaskStateMachine {
    pub fn new(context: Arc<SystemContext>) -> Self {
        let actions: Vec<Box<dyn StateAction>> = vec![
            Box::new(LogTransitionAction),
            Box::new(PublishStatusEventAction::new(Arc::clone(
                &context.event_publisher,
            ))),
        ];
        Self {
            context,
            actions: Arc::new(actions),
        }
    }

    pub fn context(&self) -> &Arc<SystemContext> {
        &self.context
    }

    pub async fn get_task(&self, task_id: Uuid) -> StateMachineResult<Task> {
        self.context
            .store
            .get_task(task_id)
            .await?
            .ok_or(StateMachineError::TaskNotFound(task_id))
    }

    pub async fn list_tasks(&self) -> StateMachineResult<Vec<Task>> {
        Ok(self.context.store.list_tasks().await?)
    }

    /// Insert a task and launch it exactly once.
    #[instrument(skip(self, new_task), fields(task_type = %new_task.task_type))]
    pub async fn create_task(&self, new_task: NewTask) -> StateMachineResult<Task> {
        let task = self.context.store.insert_task(&new_task.into_task()).await?;
        log_task_operation("create", task.task_id, None, task.status.as_str(), None);

        self.launch(task.task_id, false).await?;
        self.get_task(task.task_id).await
    }

    /// Enter STARTING and dispatch the workload. With `continue_mode` the
    /// workload resumes from the checkpointed step.
    #[instrument(skip(self))]
    pub async fn launch(
        &self,
        task_id: Uuid,
        continue_mode: bool,
    ) -> StateMachineResult<TransitionOutcome> {
        let guard = self.context.task_locks.acquire(task_id).await;
        self.launch_locked(guard, task_id, continue_mode).await
    }

    async fn launch_locked(
        &self,
        guard: OwnedMutexGuard<()>,
        task_id: Uuid,
        continue_mode: bool,
    ) -> StateMachineResult<TransitionOutcome> {
        let (outcome, task) = self
            .transition(task_id, TaskEvent::Launch, |_| {})
            .await?;
        if !outcome.is_applied() {
            return Ok(outcome);
        }

        if task.debug_mode {
            drop(guard);
            self.run_inline(task_id, continue_mode).await?;
            return Ok(outcome);
        }

        match self
            .context
            .dispatcher
            .enqueue(self.workload_request(task_id, continue_mode))
            .await
        {
            Ok(external_id) => {
                if let Err(e) = self
                    .context
                    .handles
                    .record(task_id, external_id.clone())
                    .await
                {
                    // the run can never prove ownership without its handle
                    self.context
                        .handles
                        .terminate(&ExecutionHandle::new(task_id, external_id.clone()))
                        .await;
                    self.transition(
                        task_id,
                        TaskEvent::fail_with_error(format!("Recording execution failed: {e}")),
                        stamp_finished,
                    )
                    .await?;
                    return Err(e.into());
                }
                info!(task_id = %task_id, external_id = %external_id, "Task dispatched");
            }
            Err(e) => {
                log_error(
                    "task_state_machine",
                    "launch",
                    &e.to_string(),
                    Some(&task_id.to_string()),
                );
                self.transition(
                    task_id,
                    TaskEvent::fail_with_error(format!("Dispatch failed: {e}")),
                    stamp_finished,
                )
                .await?;
            }
        }

        Ok(outcome)
    }

    fn workload_request(&self, task_id: Uuid, continue_mode: bool) -> WorkloadRequest {
        let machine = self.clone();
        WorkloadRequest {
            task_id,
            continue_mode,
            workload: Box::new(move |ctx: WorkloadContext| {
                SimulatedWorkload::new(machine, task_id, continue_mode)
                    .run(Some(ctx.external_id), ctx.cancellation)
                    .boxed()
            }),
            callbacks: Arc::new(self.clone()),
        }
    }

    /// Debug mode: run the workload on the caller's task and close out here.
    async fn run_inline(&self, task_id: Uuid, continue_mode: bool) -> StateMachineResult<()> {
        debug!(task_id = %task_id, "Running workload inline");
        let result = SimulatedWorkload::new(self.clone(), task_id, continue_mode)
            .run(None, CancellationToken::new())
            .await;

        match result {
            Ok(WorkloadOutcome::Completed) => {
                self.finish(task_id).await?;
            }
            Ok(outcome) => debug!(task_id = %task_id, ?outcome, "Inline run ended early"),
            Err(e) => {
                self.fail(task_id, &e.to_string()).await?;
            }
        }
        Ok(())
    }

    /// Reset progress, purge logs and launch from the first step.
    #[instrument(skip(self))]
    pub async fn restart(&self, task_id: Uuid) -> StateMachineResult<TransitionOutcome> {
        let guard = self.context.task_locks.acquire(task_id).await;

        let current = self.get_task(task_id).await?;
        if current.status == TaskStatus::Running {
            self.context.handles.terminate_current(task_id).await?;
        }

        let (outcome, _) = self
            .transition(task_id, TaskEvent::Restart, |task| {
                task.step = 1;
                task.started_at = None;
                task.stopped_at = None;
                task.resumed_at = None;
                task.finished_at = None;
                task.log_path = None;
            })
            .await?;
        if !outcome.is_applied() {
            return Ok(outcome);
        }

        if let Err(e) = self
            .context
            .log_sink
            .purge_entity(EntityKind::Task, task_id)
        {
            warn!(task_id = %task_id, error = %e, "Could not purge previous logs");
        }

        self.launch_locked(guard, task_id, false).await?;
        Ok(outcome)
    }

    /// User halt; only from RUNNING.
    #[instrument(skip(self))]
    pub async fn pause(&self, task_id: Uuid) -> StateMachineResult<TransitionOutcome> {
        self.halt(task_id, TaskEvent::Pause).await
    }

    /// Condition/controller halt; only from RUNNING.
    #[instrument(skip(self))]
    pub async fn stop(&self, task_id: Uuid) -> StateMachineResult<TransitionOutcome> {
        self.halt(task_id, TaskEvent::Stop).await
    }

    async fn halt(&self, task_id: Uuid, event: TaskEvent) -> StateMachineResult<TransitionOutcome> {
        let _guard = self.context.task_locks.acquire(task_id).await;
        let (outcome, _) = self.transition(task_id, event, stamp_stopped).await?;
        if outcome.is_applied() {
            self.context.handles.terminate_current(task_id).await?;
        }
        Ok(outcome)
    }

    /// Continue a PAUSED or STOPPED task from its checkpoint.
    #[instrument(skip(self))]
    pub async fn resume(&self, task_id: Uuid) -> StateMachineResult<TransitionOutcome> {
        let guard = self.context.task_locks.acquire(task_id).await;
        let (outcome, _) = self
            .transition(task_id, TaskEvent::Resume, |task| {
                task.resumed_at = Some(Utc::now());
            })
            .await?;
        if outcome.is_applied() {
            self.launch_locked(guard, task_id, true).await?;
        }
        Ok(outcome)
    }

    /// Cancel from any non-terminal status. Repeating it only re-sends the
    /// termination request.
    #[instrument(skip(self))]
    pub async fn cancel(&self, task_id: Uuid) -> StateMachineResult<TransitionOutcome> {
        let _guard = self.context.task_locks.acquire(task_id).await;
        let (outcome, _) = self
            .transition(task_id, TaskEvent::Cancel, stamp_finished)
            .await?;
        if !outcome.is_rejected() {
            self.context.handles.terminate_current(task_id).await?;
        }
        Ok(outcome)
    }

    /// Completion close-out, reported by the dispatcher.
    #[instrument(skip(self))]
    pub async fn finish(&self, task_id: Uuid) -> StateMachineResult<TransitionOutcome> {
        let _guard = self.context.task_locks.acquire(task_id).await;
        let (outcome, _) = self
            .transition(task_id, TaskEvent::Finish, stamp_finished)
            .await?;
        if outcome.is_applied() {
            self.context.handles.terminate_current(task_id).await?;
        }
        Ok(outcome)
    }

    /// Failure close-out, reported by the dispatcher.
    #[instrument(skip(self))]
    pub async fn fail(&self, task_id: Uuid, message: &str) -> StateMachineResult<TransitionOutcome> {
        let _guard = self.context.task_locks.acquire(task_id).await;
        let (outcome, _) = self
            .transition(task_id, TaskEvent::fail_with_error(message), stamp_finished)
            .await?;
        if outcome.is_applied() {
            self.context.handles.terminate_current(task_id).await?;
        }
        Ok(outcome)
    }

    /// Route a requested status through the operation that reaches it.
    #[instrument(skip(self))]
    pub async fn change_status(
        &self,
        task_id: Uuid,
        target: TaskStatus,
    ) -> StateMachineResult<TransitionOutcome> {
        let task = self.get_task(task_id).await?;
        if task.status == target {
            return Ok(TransitionOutcome::Unchanged { status: target });
        }

        match TransitionGuard::event_for_target(target) {
            Some(TaskEvent::Restart) => self.restart(task_id).await,
            Some(TaskEvent::Resume) => self.resume(task_id).await,
            Some(TaskEvent::Pause) => self.pause(task_id).await,
            Some(TaskEvent::Stop) => self.stop(task_id).await,
            Some(TaskEvent::Cancel) => self.cancel(task_id).await,
            Some(other) => Err(StateMachineError::Internal(format!(
                "No operation for {}",
                other.event_type()
            ))),
            None => {
                let event = if target == TaskStatus::Finished {
                    TaskEvent::Finish
                } else {
                    TaskEvent::fail_with_error("")
                };
                info!(task_id = %task_id, target = %target, "Status is reported by the dispatcher only");
                Ok(TransitionOutcome::Rejected {
                    from: task.status,
                    event: event.event_type(),
                })
            }
        }
    }

    /// Apply an external edit. Execution-bound fields are refused while the
    /// task may be executing; a requested status goes through
    /// [`Self::change_status`].
    #[instrument(skip(self, edit))]
    pub async fn update_task(&self, task_id: Uuid, edit: TaskEdit) -> StateMachineResult<Task> {
        {
            let _guard = self.context.task_locks.acquire(task_id).await;
            self.write_edit(task_id, &edit).await?;
        }

        if let Some(status) = edit.status {
            let outcome = self.change_status(task_id, status).await?;
            if outcome.is_rejected() {
                return Err(StateMachineError::GuardFailed {
                    reason: format!("Cannot change status to {status} from {}", outcome.status()),
                });
            }
        }

        self.get_task(task_id).await
    }

    async fn write_edit(&self, task_id: Uuid, edit: &TaskEdit) -> StateMachineResult<()> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let mut task = self.get_task(task_id).await?;
            TransitionGuard::check_edit(&task, edit)?;

            let before = task.clone();
            if let Some(debug_mode) = edit.debug_mode {
                task.debug_mode = debug_mode;
            }
            if let Some(job_id) = edit.job_id {
                task.job_id = job_id;
            }
            if let Some(step) = edit.step {
                task.step = step;
            }
            if let Some(log_path) = &edit.log_path {
                task.log_path = log_path.clone();
            }
            if task == before {
                return Ok(());
            }

            match self.context.store.update_task(&task).await {
                Ok(_) => {
                    log_task_operation("edit", task_id, None, task.status.as_str(), None);
                    return Ok(());
                }
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(StateMachineError::WriteContention {
            task_id,
            attempts: MAX_WRITE_ATTEMPTS,
        })
    }

    /// Delete the task's log artifacts.
    pub async fn purge(&self, task_id: Uuid) -> StateMachineResult<()> {
        self.get_task(task_id).await?;
        self.context
            .log_sink
            .purge_entity(EntityKind::Task, task_id)?;
        Ok(())
    }

    /// Last lines of the task's log; empty when it has none yet.
    pub async fn log_excerpt(&self, task_id: Uuid, lines: usize) -> StateMachineResult<Vec<String>> {
        let task = self.get_task(task_id).await?;
        match task.log_path {
            Some(path) => Ok(self.context.log_sink.tail(&path, lines)?),
            None => Ok(Vec::new()),
        }
    }

    /// Terminate any live execution, purge logs and remove the task with its
    /// handles. Returns false when the task did not exist.
    #[instrument(skip(self))]
    pub async fn delete_task(&self, task_id: Uuid) -> StateMachineResult<bool> {
        let deleted = {
            let _guard = self.context.task_locks.acquire(task_id).await;
            if self.context.store.get_task(task_id).await?.is_none() {
                return Ok(false);
            }

            self.context.handles.terminate_current(task_id).await?;
            if let Err(e) = self
                .context
                .log_sink
                .purge_entity(EntityKind::Task, task_id)
            {
                warn!(task_id = %task_id, error = %e, "Could not purge logs of deleted task");
            }
            self.context.handles.forget(task_id).await?;
            self.context.store.delete_task(task_id).await?
        };

        self.context.task_locks.remove(&task_id);
        log_task_operation("delete", task_id, None, "DELETED", None);
        Ok(deleted)
    }

    /// STARTING to RUNNING at the beginning of a workload run. Returns `None`
    /// when the run no longer owns the task.
    pub async fn mark_running(
        &self,
        task_id: Uuid,
        continue_mode: bool,
        execution: Option<&ExternalId>,
        log_path: String,
    ) -> StateMachineResult<Option<Task>> {
        let _guard = self.context.task_locks.acquire(task_id).await;

        if let Some(external_id) = execution {
            if !self.context.handles.is_current(task_id, external_id).await? {
                debug!(task_id = %task_id, external_id = %external_id, "Stale execution not started");
                return Ok(None);
            }
        }

        let (outcome, task) = self
            .transition(task_id, TaskEvent::Run, move |task| {
                task.started_at = Some(Utc::now());
                task.log_path = Some(log_path.clone());
                if !continue_mode {
                    task.step = 1;
                }
            })
            .await?;

        Ok(outcome.is_applied().then_some(task))
    }

    /// Persist the workload's progress. Only written while the task is
    /// RUNNING, the writer holds the current handle and `step` advances.
    pub async fn checkpoint(
        &self,
        task_id: Uuid,
        execution: Option<&ExternalId>,
        step: i64,
    ) -> StateMachineResult<Checkpoint> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let mut task = self.get_task(task_id).await?;
            if task.status != TaskStatus::Running || step <= task.step {
                return Ok(Checkpoint::Discarded);
            }
            if let Some(external_id) = execution {
                if !self.context.handles.is_current(task_id, external_id).await? {
                    return Ok(Checkpoint::Discarded);
                }
            }

            task.step = step;
            match self.context.store.update_task(&task).await {
                Ok(written) => return Ok(Checkpoint::Written(written)),
                Err(e) if e.is_conflict() => {
                    debug!(task_id = %task_id, step, attempt, "Checkpoint conflicted; retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StateMachineError::WriteContention {
            task_id,
            attempts: MAX_WRITE_ATTEMPTS,
        })
    }

    /// Guarded read-modify-write of the task's status. `mutate` runs on the
    /// loaded row after the status is set, on every attempt.
    async fn transition<F>(
        &self,
        task_id: Uuid,
        event: TaskEvent,
        mutate: F,
    ) -> StateMachineResult<(TransitionOutcome, Task)>
    where
        F: Fn(&mut Task) + Send,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let mut task = self.get_task(task_id).await?;
            let from = task.status;

            let to = match TransitionGuard::check(from, &event) {
                Ok(GuardDecision::Allow(to)) => to,
                Ok(GuardDecision::AlreadyThere) => {
                    debug!(task_id = %task_id, status = %from, event = event.event_type(), "Already in target status");
                    return Ok((TransitionOutcome::Unchanged { status: from }, task));
                }
                Err(err) => {
                    info!(task_id = %task_id, error = %err, "Transition rejected");
                    return Ok((
                        TransitionOutcome::Rejected {
                            from,
                            event: event.event_type(),
                        },
                        task,
                    ));
                }
            };

            task.status = to;
            mutate(&mut task);

            match self.context.store.update_task(&task).await {
                Ok(written) => {
                    self.execute_actions(&AppliedTransition {
                        task: written.clone(),
                        from,
                        to,
                        event: event.clone(),
                    })
                    .await;
                    return Ok((TransitionOutcome::Applied { from, to }, written));
                }
                Err(e) if e.is_conflict() => {
                    debug!(task_id = %task_id, attempt, "Concurrent modification; retrying transition");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StateMachineError::WriteContention {
            task_id,
            attempts: MAX_WRITE_ATTEMPTS,
        })
    }

    /// Actions run after the row is written; a failing action never undoes it.
    async fn execute_actions(&self, transition: &AppliedTransition) {
        for action in self.actions.iter() {
            if let Err(e) = action.execute(transition).await {
                warn!(
                    task_id = %transition.task.task_id,
                    action = action.description(),
                    error = %e,
                    "Transition action failed"
                );
            }
        }
    }

    /// Task owning `external_id`, if that execution is still its current one.
    async fn owning_task(&self, external_id: &ExternalId) -> Option<Uuid> {
        let handle = match self.context.handles.find_by_external_id(external_id).await {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                warn!(external_id = %external_id, "Completion for unknown execution");
                return None;
            }
            Err(e) => {
                log_error("task_state_machine", "callback", &e.to_string(), Some(external_id.as_str()));
                return None;
            }
        };

        match self.context.handles.is_current(handle.task_id, external_id).await {
            Ok(true) => Some(handle.task_id),
            Ok(false) => {
                info!(task_id = %handle.task_id, external_id = %external_id, "Ignoring completion from superseded execution");
                None
            }
            Err(e) => {
                log_error("task_state_machine", "callback", &e.to_string(), Some(external_id.as_str()));
                None
            }
        }
    }
}

#[async_trait]
impl DispatchCallbacks for TaskStateMachine {
    async fn on_success(&self, external_id: ExternalId, outcome: WorkloadOutcome) {
        let Some(task_id) = self.owning_task(&external_id).await else {
            return;
        };
        if outcome != WorkloadOutcome::Completed {
            debug!(task_id = %task_id, ?outcome, "Execution ended without completing");
            return;
        }
        if let Err(e) = self.finish(task_id).await {
            log_error("task_state_machine", "finish", &e.to_string(), Some(&task_id.to_string()));
        }
    }

    async fn on_failure(&self, external_id: ExternalId, error: WorkloadError) {
        let Some(task_id) = self.owning_task(&external_id).await else {
            return;
        };
        if let Err(e) = self.fail(task_id, &error.to_string()).await {
            log_error("task_state_machine", "fail", &e.to_string(), Some(&task_id.to_string()));
        }
    }
}
