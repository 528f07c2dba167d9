//! # Job Model
//!
//! A Job is a recurring producer of Tasks. Its starting and stopping
//! conditions decide when a new cycle begins and when the current Task is
//! halted; `continue_mode` selects whether that halt is a resumable pause or a
//! hard stop.

use super::condition::JobCondition;
use super::task::TaskType;
use crate::conditions::{Condition, ConditionEvaluator};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    /// Unique across all jobs
    pub name: String,
    pub task_type: TaskType,
    pub enabled: bool,
    /// Stop signals pause the current task instead of stopping it
    pub continue_mode: bool,
    pub owner: Option<String>,
    pub parent_job_id: Option<Uuid>,
    pub parent_task_id: Option<Uuid>,
    pub starting_condition: Option<JobCondition>,
    pub stopping_condition: Option<JobCondition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl Job {
    pub fn conditions(&self) -> impl Iterator<Item = &JobCondition> {
        self.starting_condition
            .iter()
            .chain(self.stopping_condition.iter())
    }

    /// Threshold a new task inherits from a MaxRecords stopping condition.
    pub fn record_limit(&self) -> Option<i64> {
        self.stopping_condition
            .as_ref()
            .and_then(|c| c.condition.record_limit())
            .and_then(|limit| i64::try_from(limit).ok())
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Job: {}", self.name)
    }
}

/// New Job for creation (without generated fields)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub name: String,
    pub task_type: TaskType,
    pub enabled: bool,
    pub continue_mode: bool,
    pub owner: Option<String>,
    pub parent_job_id: Option<Uuid>,
    pub parent_task_id: Option<Uuid>,
    pub starting_condition: Option<Condition>,
    pub stopping_condition: Option<Condition>,
}

impl NewJob {
    pub fn new(name: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            name: name.into(),
            task_type,
            enabled: true,
            continue_mode: false,
            owner: None,
            parent_job_id: None,
            parent_task_id: None,
            starting_condition: None,
            stopping_condition: None,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn continuing(mut self) -> Self {
        self.continue_mode = true;
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_parent_job(mut self, parent_job_id: Uuid) -> Self {
        self.parent_job_id = Some(parent_job_id);
        self
    }

    pub fn starting_when(mut self, condition: Condition) -> Self {
        self.starting_condition = Some(condition);
        self
    }

    pub fn stopping_when(mut self, condition: Condition) -> Self {
        self.stopping_condition = Some(condition);
        self
    }

    /// Materialize the row; conditions are attached by the controller.
    pub fn into_job(self) -> Job {
        let now = Utc::now();
        Job {
            job_id: Uuid::new_v4(),
            name: self.name,
            task_type: self.task_type,
            enabled: self.enabled,
            continue_mode: self.continue_mode,
            owner: self.owner,
            parent_job_id: self.parent_job_id,
            parent_task_id: self.parent_task_id,
            starting_condition: None,
            stopping_condition: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }
}

/// Field edits for an existing job. `None` leaves a field untouched;
/// enablement is changed through pause/resume only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobUpdate {
    pub name: Option<String>,
    pub task_type: Option<TaskType>,
    pub continue_mode: Option<bool>,
    pub owner: Option<Option<String>>,
}

/// Read projection used by job detail views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDetail {
    pub job: Job,
    pub last_run: Option<DateTime<Utc>>,
    /// Newest first
    pub tasks: Vec<super::Task>,
}
