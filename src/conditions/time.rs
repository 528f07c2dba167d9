//! Crontab-style time conditions.

use super::{
    ConditionError, ConditionEvaluator, ConditionResult, ConditionRules, ConditionSlot,
    TriggerKind,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const WILDCARD: &str = "*";
const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Five crontab fields. Each is either `*` or a single number in range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CronSpec {
    pub minute: String,
    pub hour: String,
    /// 0-6, Sunday is 0
    pub day_of_week: String,
    pub day_of_month: String,
    pub month_of_year: String,
}

impl Default for CronSpec {
    fn default() -> Self {
        Self {
            minute: WILDCARD.to_string(),
            hour: WILDCARD.to_string(),
            day_of_week: WILDCARD.to_string(),
            day_of_month: WILDCARD.to_string(),
            month_of_year: WILDCARD.to_string(),
        }
    }
}

impl CronSpec {
    /// Fire once a day at `hour:minute`.
    pub fn daily_at(hour: u32, minute: u32) -> Self {
        Self {
            minute: minute.to_string(),
            hour: hour.to_string(),
            ..Self::default()
        }
    }

    /// Fire once an hour at `minute`.
    pub fn hourly_at(minute: u32) -> Self {
        Self {
            minute: minute.to_string(),
            ..Self::default()
        }
    }

    pub fn with_day_of_week(mut self, day_of_week: u32) -> Self {
        self.day_of_week = day_of_week.to_string();
        self
    }

    pub fn with_day_of_month(mut self, day_of_month: u32) -> Self {
        self.day_of_month = day_of_month.to_string();
        self
    }

    pub fn with_month_of_year(mut self, month_of_year: u32) -> Self {
        self.month_of_year = month_of_year.to_string();
        self
    }

    /// Check every field's range and the minute wildcard rule.
    pub fn validate(&self, rules: &ConditionRules) -> ConditionResult<()> {
        if self.minute.trim() == WILDCARD && !rules.allow_wildcard_minute {
            return Err(ConditionError::WildcardMinute);
        }
        check_field("minute", &self.minute, 0, 59)?;
        check_field("hour", &self.hour, 0, 23)?;
        check_field("day_of_week", &self.day_of_week, 0, 6)?;
        check_field("day_of_month", &self.day_of_month, 1, 31)?;
        check_field("month_of_year", &self.month_of_year, 1, 12)?;
        Ok(())
    }

    /// Six-field expression (seconds first) understood by the `cron` crate.
    pub fn to_expression(&self) -> ConditionResult<String> {
        let day_of_week = match parse_field("day_of_week", &self.day_of_week, 0, 6)? {
            None => WILDCARD.to_string(),
            Some(day) => DAY_NAMES[day as usize].to_string(),
        };
        Ok(format!(
            "0 {} {} {} {} {}",
            self.minute.trim(),
            self.hour.trim(),
            self.day_of_month.trim(),
            self.month_of_year.trim(),
            day_of_week
        ))
    }

    /// Parse into a schedule the scheduler can iterate.
    pub fn to_schedule(&self) -> ConditionResult<cron::Schedule> {
        let expression = self.to_expression()?;
        cron::Schedule::from_str(&expression).map_err(|e| ConditionError::InvalidExpression {
            expression,
            reason: e.to_string(),
        })
    }
}

impl fmt::Display for CronSpec {
    /// Classic five-field crontab order.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.minute, self.hour, self.day_of_month, self.month_of_year, self.day_of_week
        )
    }
}

fn parse_field(field: &'static str, raw: &str, min: u32, max: u32) -> ConditionResult<Option<u32>> {
    let value = raw.trim();
    if value == WILDCARD {
        return Ok(None);
    }
    let invalid = |reason: String| ConditionError::InvalidField {
        field,
        value: raw.to_string(),
        reason,
    };
    let number: u32 = value
        .parse()
        .map_err(|_| invalid("expected \"*\" or a number".to_string()))?;
    if number < min || number > max {
        return Err(invalid(format!("must be between {min} and {max}")));
    }
    Ok(Some(number))
}

fn check_field(field: &'static str, raw: &str, min: u32, max: u32) -> ConditionResult<()> {
    parse_field(field, raw, min, max).map(|_| ())
}

/// Fire on a recurring crontab schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeCondition {
    pub crontab: CronSpec,
}

impl ConditionEvaluator for TimeCondition {
    fn describe_trigger(&self) -> String {
        format!("Time: {}", self.crontab)
    }

    fn validate(&self, _slot: ConditionSlot, rules: &ConditionRules) -> ConditionResult<()> {
        self.crontab.validate(rules)?;
        self.crontab.to_schedule().map(|_| ())
    }

    fn trigger_kind(&self) -> TriggerKind {
        TriggerKind::Schedule
    }

    fn schedule(&self) -> Option<&CronSpec> {
        Some(&self.crontab)
    }
}
