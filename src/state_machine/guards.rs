//! Transition legality.
//!
//! Every control-plane operation and every `change_status` request is checked
//! here first, so the direct operations and the dispatch table share one set of
//! preconditions.

use super::errors::{GuardError, GuardResult};
use super::events::TaskEvent;
use super::states::TaskStatus;
use crate::models::{Task, TaskEdit};

/// Result of checking an event against the current status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// Transition to the contained status
    Allow(TaskStatus),
    /// Already in the event's target status; nothing to do
    AlreadyThere,
}

pub struct TransitionGuard;

impl TransitionGuard {
    /// Decide whether `event` may be applied to a task in `current`.
    pub fn check(current: TaskStatus, event: &TaskEvent) -> GuardResult<GuardDecision> {
        use TaskEvent::*;
        use TaskStatus::*;

        let target = event.natural_target();
        if current == target && event.is_idempotent() {
            return Ok(GuardDecision::AlreadyThere);
        }

        let allowed = match (current, event) {
            (Starting | Paused | Stopped, Launch) => true,
            (Starting, Run) => true,
            (Running, Pause) => true,
            (Running, Stop) => true,
            (Paused | Stopped, Resume) => true,
            (Starting | Running | Paused | Stopped, Cancel) => true,
            (Running, Finish) => true,
            (Starting | Running, Fail(_)) => true,
            (_, Restart) => true,
            _ => false,
        };

        if allowed {
            Ok(GuardDecision::Allow(target))
        } else {
            Err(GuardError::InvalidTransition {
                from: current,
                event: event.event_type().to_string(),
            })
        }
    }

    /// Map a requested target status to the operation that reaches it.
    ///
    /// FINISHED and FAILED are reported by the dispatcher only and have no entry.
    pub fn event_for_target(target: TaskStatus) -> Option<TaskEvent> {
        match target {
            TaskStatus::Starting => Some(TaskEvent::Restart),
            TaskStatus::Running => Some(TaskEvent::Resume),
            TaskStatus::Paused => Some(TaskEvent::Pause),
            TaskStatus::Stopped => Some(TaskEvent::Stop),
            TaskStatus::Canceled => Some(TaskEvent::Cancel),
            TaskStatus::Finished | TaskStatus::Failed => None,
        }
    }

    /// Refuse edits to execution-bound fields while the task may be executing.
    pub fn check_edit(task: &Task, edit: &TaskEdit) -> GuardResult<()> {
        if !task.status.is_active() {
            return Ok(());
        }

        let mut fields = Vec::new();
        if edit.debug_mode.is_some_and(|v| v != task.debug_mode) {
            fields.push("debug_mode");
        }
        if edit.job_id.is_some_and(|v| v != task.job_id) {
            fields.push("job");
        }
        if edit.step.is_some_and(|v| v != task.step) {
            fields.push("step");
        }
        if edit.log_path.as_ref().is_some_and(|v| *v != task.log_path) {
            fields.push("log_path");
        }

        if fields.is_empty() {
            Ok(())
        } else {
            Err(GuardError::EditWhileActive {
                status: task.status,
                fields: fields.join(", "),
            })
        }
    }
}
