use serde::{Deserialize, Serialize};
use std::fmt;

/// Task lifecycle status.
///
/// `STARTING → RUNNING → {PAUSED, STOPPED, CANCELED, FAILED, FINISHED}`, with
/// `PAUSED`/`STOPPED` re-entering at `STARTING` on resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Launch requested, workload not yet executing
    #[default]
    Starting,
    /// Workload is executing and checkpointing progress
    Running,
    /// Halted by a user; resumable from the last checkpoint
    Paused,
    /// Halted by a condition or controller; resumable from the last checkpoint
    Stopped,
    /// Canceled; terminal
    Canceled,
    /// Workload raised an error; terminal
    Failed,
    /// Workload reached its maximum count; terminal
    Finished,
}

impl TaskStatus {
    /// Check if this is a terminal state (only `restart` leaves it)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Canceled | Self::Failed | Self::Finished)
    }

    /// Check if a live execution may exist in this state
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    /// Check if `resume` is accepted from this state
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Paused | Self::Stopped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Stopped => "STOPPED",
            Self::Canceled => "CANCELED",
            Self::Failed => "FAILED",
            Self::Finished => "FINISHED",
        }
    }

    pub fn all() -> [TaskStatus; 7] {
        [
            Self::Starting,
            Self::Running,
            Self::Paused,
            Self::Stopped,
            Self::Canceled,
            Self::Failed,
            Self::Finished,
        ]
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "STARTING" => Ok(Self::Starting),
            "RUNNING" => Ok(Self::Running),
            "PAUSED" => Ok(Self::Paused),
            "STOPPED" => Ok(Self::Stopped),
            "CANCELED" => Ok(Self::Canceled),
            "FAILED" => Ok(Self::Failed),
            "FINISHED" => Ok(Self::Finished),
            _ => Err(format!("Invalid task status: {s}")),
        }
    }
}
