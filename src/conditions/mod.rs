//! # Condition Evaluators
//!
//! Predicates that decide when a Job's start or stop signal fires.
//!
//! - [`TimeCondition`] wraps a crontab-style schedule and is realized as one
//!   recurring scheduler registration.
//! - [`MaxRecordsCondition`] is not time-driven: the task's own progress counter
//!   reaching the threshold is the trigger, checked by the workload.
//!
//! The job controller only dispatches on [`Condition`]'s tag; everything else
//! goes through the [`ConditionEvaluator`] trait.

pub mod max_records;
pub mod time;

pub use max_records::MaxRecordsCondition;
pub use time::{CronSpec, TimeCondition};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConditionError {
    #[error("Invalid cron {field} value {value:?}: {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Minute cannot be \"*\"")]
    WildcardMinute,

    #[error("max_records must be greater than 0")]
    ZeroMaxRecords,

    #[error("{kind} condition cannot be used as a {slot} condition")]
    UnsupportedSlot {
        kind: &'static str,
        slot: ConditionSlot,
    },

    #[error("Invalid schedule expression {expression:?}: {reason}")]
    InvalidExpression { expression: String, reason: String },
}

pub type ConditionResult<T> = Result<T, ConditionError>;

/// Which side of a Job a condition drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionSlot {
    Starting,
    Stopping,
}

impl ConditionSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Stopping => "stopping",
        }
    }
}

impl fmt::Display for ConditionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConditionSlot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(Self::Starting),
            "stopping" => Ok(Self::Stopping),
            _ => Err(format!("Invalid condition slot: {s}")),
        }
    }
}

/// What drives a condition's trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// An external recurring schedule fires the signal
    Schedule,
    /// The task's progress counter fires the signal
    Progress,
}

/// Validation knobs that come from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConditionRules {
    /// Accept `*` in the minute field (fires every minute)
    pub allow_wildcard_minute: bool,
}

/// Contract every condition variant implements.
pub trait ConditionEvaluator {
    /// Short human description of when the condition fires
    fn describe_trigger(&self) -> String;

    /// Reject configurations that can never, or should never, fire
    fn validate(&self, slot: ConditionSlot, rules: &ConditionRules) -> ConditionResult<()>;

    fn trigger_kind(&self) -> TriggerKind;

    /// Recurring schedule to register, for schedule-driven conditions
    fn schedule(&self) -> Option<&CronSpec> {
        None
    }

    /// Progress threshold, for progress-driven conditions
    fn record_limit(&self) -> Option<u64> {
        None
    }
}

/// Tagged union of the built-in condition variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    Time(TimeCondition),
    MaxRecords(MaxRecordsCondition),
}

impl Condition {
    pub fn time(crontab: CronSpec) -> Self {
        Self::Time(TimeCondition { crontab })
    }

    pub fn max_records(max_records: u64) -> Self {
        Self::MaxRecords(MaxRecordsCondition { max_records })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Time(_) => "time",
            Self::MaxRecords(_) => "max_records",
        }
    }

    fn evaluator(&self) -> &dyn ConditionEvaluator {
        match self {
            Self::Time(condition) => condition,
            Self::MaxRecords(condition) => condition,
        }
    }
}

impl ConditionEvaluator for Condition {
    fn describe_trigger(&self) -> String {
        self.evaluator().describe_trigger()
    }

    fn validate(&self, slot: ConditionSlot, rules: &ConditionRules) -> ConditionResult<()> {
        self.evaluator().validate(slot, rules)
    }

    fn trigger_kind(&self) -> TriggerKind {
        self.evaluator().trigger_kind()
    }

    fn schedule(&self) -> Option<&CronSpec> {
        match self {
            Self::Time(condition) => condition.schedule(),
            Self::MaxRecords(_) => None,
        }
    }

    fn record_limit(&self) -> Option<u64> {
        self.evaluator().record_limit()
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe_trigger())
    }
}
