//! # Recurring Schedule Registration
//!
//! Time conditions are realized as standing schedule entries that emit a
//! [`JobSignal`] on their cadence. The [`Scheduler`] trait is the seam the job
//! controller talks to; [`CronScheduler`] is the in-process implementation.

pub mod cron_scheduler;

pub use cron_scheduler::{CronScheduler, ScheduleEntry};

use crate::conditions::{ConditionError, CronSpec};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleId(pub Uuid);

impl ScheduleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ScheduleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Start,
    Stop,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => f.write_str("start"),
            Self::Stop => f.write_str("stop"),
        }
    }
}

/// Payload a schedule entry delivers when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobSignal {
    pub job_id: Uuid,
    pub kind: SignalKind,
}

impl JobSignal {
    pub fn start(job_id: Uuid) -> Self {
        Self {
            job_id,
            kind: SignalKind::Start,
        }
    }

    pub fn stop(job_id: Uuid) -> Self {
        Self {
            job_id,
            kind: SignalKind::Stop,
        }
    }
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Schedule {0} is not registered")]
    NotRegistered(ScheduleId),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(#[from] ConditionError),

    #[error("Scheduler is already running")]
    AlreadyRunning,
}

pub type ScheduleResult<T> = Result<T, ScheduleError>;

/// Registration surface for recurring signals.
pub trait Scheduler: Send + Sync {
    fn register_recurring(
        &self,
        spec: &CronSpec,
        signal: JobSignal,
        enabled: bool,
    ) -> ScheduleResult<ScheduleId>;

    fn set_enabled(&self, schedule_id: ScheduleId, enabled: bool) -> ScheduleResult<()>;

    /// `None` when the schedule is not registered
    fn is_enabled(&self, schedule_id: ScheduleId) -> Option<bool>;

    /// Removing an unknown schedule is not an error
    fn unregister(&self, schedule_id: ScheduleId) -> bool;
}
