//! # Task Model
//!
//! A Task is one executable run of a simulated workload with resumable
//! progress. Its row (status, step, timestamps) is the single source of truth
//! shared by the control plane and the workload executor; every write goes
//! through a version check.

use crate::state_machine::TaskStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Workload kind, each implying a deterministic amount of simulated work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Empty,
    Small,
    Medium,
    Large,
    /// Always fails when executed
    Failure,
}

impl TaskType {
    /// Final value of `step` for a completed run; `None` means the workload errors.
    pub fn max_count(&self) -> Option<i64> {
        match self {
            Self::Empty => Some(1),
            Self::Small => Some(5),
            Self::Medium => Some(1000),
            Self::Large => Some(10000),
            Self::Failure => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "EMPTY",
            Self::Small => "SMALL",
            Self::Medium => "MEDIUM",
            Self::Large => "LARGE",
            Self::Failure => "FAILURE",
        }
    }

    /// Human label used in task logs ("Starting small Task").
    pub fn label(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
            Self::Failure => "failure",
        }
    }

    pub fn all() -> [TaskType; 5] {
        [
            Self::Empty,
            Self::Small,
            Self::Medium,
            Self::Large,
            Self::Failure,
        ]
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "EMPTY" => Ok(Self::Empty),
            "SMALL" => Ok(Self::Small),
            "MEDIUM" => Ok(Self::Medium),
            "LARGE" => Ok(Self::Large),
            "FAILURE" => Ok(Self::Failure),
            _ => Err(format!("Invalid task type: {s}")),
        }
    }
}

/// Represents a task instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: Uuid,
    pub task_type: TaskType,
    pub status: TaskStatus,
    /// Progress counter; starts at 1 and only advances while RUNNING
    pub step: i64,
    /// Run the workload inline instead of through the dispatcher
    pub debug_mode: bool,
    pub log_path: Option<String>,
    pub job_id: Option<Uuid>,
    pub parent_task_id: Option<Uuid>,
    pub owner: Option<String>,
    /// Step at which the owning job's stop signal is raised
    pub max_records: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub resumed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, bumped on every write
    pub version: i64,
}

impl Task {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task: {} - {}", self.task_id, self.task_type)
    }
}

/// New Task for creation (without generated fields)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub task_type: TaskType,
    pub debug_mode: bool,
    pub job_id: Option<Uuid>,
    pub parent_task_id: Option<Uuid>,
    pub owner: Option<String>,
    pub max_records: Option<i64>,
}

impl NewTask {
    pub fn new(task_type: TaskType) -> Self {
        Self {
            task_type,
            debug_mode: false,
            job_id: None,
            parent_task_id: None,
            owner: None,
            max_records: None,
        }
    }

    pub fn debug(mut self) -> Self {
        self.debug_mode = true;
        self
    }

    pub fn for_job(mut self, job_id: Uuid) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn with_parent_task(mut self, parent_task_id: Option<Uuid>) -> Self {
        self.parent_task_id = parent_task_id;
        self
    }

    pub fn with_owner(mut self, owner: Option<String>) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_max_records(mut self, max_records: Option<i64>) -> Self {
        self.max_records = max_records;
        self
    }

    /// Materialize a fresh row in STARTING with `step == 1`.
    pub fn into_task(self) -> Task {
        Task {
            task_id: Uuid::new_v4(),
            task_type: self.task_type,
            status: TaskStatus::Starting,
            step: 1,
            debug_mode: self.debug_mode,
            log_path: None,
            job_id: self.job_id,
            parent_task_id: self.parent_task_id,
            owner: self.owner,
            max_records: self.max_records,
            created_at: Utc::now(),
            started_at: None,
            stopped_at: None,
            resumed_at: None,
            finished_at: None,
            version: 0,
        }
    }
}

/// External edit of a task. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskEdit {
    pub debug_mode: Option<bool>,
    pub job_id: Option<Option<Uuid>>,
    pub step: Option<i64>,
    pub log_path: Option<Option<String>>,
    /// Requested status, routed through `change_status`
    pub status: Option<TaskStatus>,
}
