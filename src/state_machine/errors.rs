use super::states::TaskStatus;
use crate::database::PersistenceError;
use crate::log_sink::LogSinkError;
use thiserror::Error;
use uuid::Uuid;

/// Comprehensive error types for state machine operations
#[derive(Error, Debug)]
pub enum StateMachineError {
    #[error("Guard condition failed: {reason}")]
    GuardFailed { reason: String },

    #[error("Invalid state transition from {from} on {event}")]
    InvalidTransition { from: TaskStatus, event: String },

    #[error("Task {0} not found")]
    TaskNotFound(Uuid),

    #[error("Persistence operation failed: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Log sink operation failed: {0}")]
    LogSink(#[from] LogSinkError),

    #[error("Gave up after {attempts} conflicting writes to task {task_id}")]
    WriteContention { task_id: Uuid, attempts: usize },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Specific error type for guard condition failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("Event {event} is not accepted from {from}")]
    InvalidTransition { from: TaskStatus, event: String },

    #[error("Cannot change {fields} while task is {status}; stop it first")]
    EditWhileActive { status: TaskStatus, fields: String },
}

impl From<GuardError> for StateMachineError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::InvalidTransition { from, event } => {
                Self::InvalidTransition { from, event }
            }
            other => Self::GuardFailed {
                reason: other.to_string(),
            },
        }
    }
}

/// Result type alias for state machine operations
pub type StateMachineResult<T> = Result<T, StateMachineError>;
pub type GuardResult<T> = Result<T, GuardError>;
