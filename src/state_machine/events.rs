use super::states::TaskStatus;
use serde::{Deserialize, Serialize};

/// Events that can trigger task status transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TaskEvent {
    /// Enter STARTING and dispatch the workload
    Launch,
    /// Workload began executing
    Run,
    /// User-requested halt, resumable
    Pause,
    /// Resume a paused or stopped task from its checkpoint
    Resume,
    /// Condition-requested halt, resumable
    Stop,
    /// Cancel the task
    Cancel,
    /// Workload reached its maximum count
    Finish,
    /// Workload failed with an error message
    Fail(String),
    /// Reset progress and launch from the first step
    Restart,
}

impl TaskEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Launch => "launch",
            Self::Run => "run",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
            Self::Cancel => "cancel",
            Self::Finish => "finish",
            Self::Fail(_) => "fail",
            Self::Restart => "restart",
        }
    }

    /// Extract error message if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }

    /// Status this event lands in when it is accepted
    pub fn natural_target(&self) -> TaskStatus {
        match self {
            Self::Launch | Self::Resume | Self::Restart => TaskStatus::Starting,
            Self::Run => TaskStatus::Running,
            Self::Pause => TaskStatus::Paused,
            Self::Stop => TaskStatus::Stopped,
            Self::Cancel => TaskStatus::Canceled,
            Self::Finish => TaskStatus::Finished,
            Self::Fail(_) => TaskStatus::Failed,
        }
    }

    /// Whether repeating the event in its own target status is a harmless no-op
    pub fn is_idempotent(&self) -> bool {
        matches!(
            self,
            Self::Pause | Self::Stop | Self::Cancel | Self::Finish | Self::Fail(_)
        )
    }

    /// Create a failure event with the given error message
    pub fn fail_with_error(error: impl Into<String>) -> Self {
        Self::Fail(error.into())
    }
}
