//! # System Constants
//!
//! Event names, topic naming and bounded-retry limits shared across the
//! control plane and the workload executor.

use uuid::Uuid;

/// Live-update event names pushed on a task's topic.
pub mod events {
    pub const TASK_STATUS_CHANGED: &str = "task.status_changed";
    pub const TASK_LOG_LINE: &str = "task.log_line";
    pub const JOB_LOG_LINE: &str = "job.log_line";
}

/// Grouping of task statuses used by store queries.
pub mod status_groups {
    use crate::state_machine::TaskStatus;

    /// Statuses in which a task may own a live execution.
    pub const ACTIVE: [TaskStatus; 2] = [TaskStatus::Starting, TaskStatus::Running];
}

/// Attempts for a version-checked read-modify-write before giving up.
pub const MAX_WRITE_ATTEMPTS: usize = 5;

/// Default number of lines returned by a log excerpt.
pub const DEFAULT_LOG_EXCERPT_LINES: usize = 50;

/// Topic name a task's live updates are published on.
pub fn task_topic(task_id: Uuid) -> String {
    format!("task_{task_id}")
}

/// Topic name a job's log lines are published on.
pub fn job_topic(job_id: Uuid) -> String {
    format!("job_{job_id}")
}
