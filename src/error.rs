//! Crate-level error type.
//!
//! Each concern (state machine, persistence, dispatch, scheduling, conditions,
//! configuration, log sink) has its own `thiserror` enum; they all fold into
//! [`TaskRunnerError`] at the public API boundary.

use crate::conditions::ConditionError;
use crate::config::ConfigurationError;
use crate::database::PersistenceError;
use crate::execution::DispatchError;
use crate::log_sink::LogSinkError;
use crate::scheduler::ScheduleError;
use crate::state_machine::errors::{GuardError, StateMachineError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TaskRunnerError {
    #[error("Task {0} not found")]
    TaskNotFound(Uuid),
    #[error("Job {0} not found")]
    JobNotFound(Uuid),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Invalid condition: {0}")]
    InvalidCondition(#[from] ConditionError),
    #[error("State machine error: {0}")]
    StateMachine(#[from] StateMachineError),
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),
    #[error("Log sink error: {0}")]
    LogSink(#[from] LogSinkError),
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<GuardError> for TaskRunnerError {
    fn from(err: GuardError) -> Self {
        TaskRunnerError::StateMachine(err.into())
    }
}

impl From<sqlx::Error> for TaskRunnerError {
    fn from(err: sqlx::Error) -> Self {
        TaskRunnerError::Persistence(PersistenceError::Database(err))
    }
}

impl TaskRunnerError {
    /// True when the error means the entity simply does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::TaskNotFound(_)
                | Self::JobNotFound(_)
                | Self::Persistence(PersistenceError::NotFound { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, TaskRunnerError>;
