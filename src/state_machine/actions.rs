use super::errors::StateMachineResult;
use super::events::TaskEvent;
use super::states::TaskStatus;
use crate::events::EventPublisher;
use crate::logging::log_task_operation;
use crate::models::Task;
use async_trait::async_trait;
use std::sync::Arc;

/// A persisted transition, handed to every action.
#[derive(Debug, Clone)]
pub struct AppliedTransition {
    /// Row as written, version already bumped
    pub task: Task,
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub event: TaskEvent,
}

/// Trait for implementing state transition actions
#[async_trait]
pub trait StateAction: Send + Sync {
    /// Execute the action
    async fn execute(&self, transition: &AppliedTransition) -> StateMachineResult<()>;

    /// Get a description of this action for logging
    fn description(&self) -> &'static str;
}

/// Push a status change on the task's live topic
pub struct PublishStatusEventAction {
    event_publisher: Arc<EventPublisher>,
}

impl PublishStatusEventAction {
    pub fn new(event_publisher: Arc<EventPublisher>) -> Self {
        Self { event_publisher }
    }
}

#[async_trait]
impl StateAction for PublishStatusEventAction {
    async fn execute(&self, transition: &AppliedTransition) -> StateMachineResult<()> {
        // relaunching from STARTING is a write, not a status change
        if transition.from != transition.to {
            self.event_publisher.publish_task_status(
                transition.task.task_id,
                transition.from,
                transition.to,
                transition.task.step,
            );
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Publish task status change on the live channel"
    }
}

/// Structured log line for every applied transition
pub struct LogTransitionAction;

#[async_trait]
impl StateAction for LogTransitionAction {
    async fn execute(&self, transition: &AppliedTransition) -> StateMachineResult<()> {
        log_task_operation(
            transition.event.event_type(),
            transition.task.task_id,
            Some(transition.from.as_str()),
            transition.to.as_str(),
            transition.event.error_message(),
        );
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Log task transition"
    }
}
