use super::{ConditionError, ConditionEvaluator, ConditionResult, ConditionRules, ConditionSlot, TriggerKind};
use serde::{Deserialize, Serialize};

/// Stop once the task's progress counter reaches `max_records`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaxRecordsCondition {
    pub max_records: u64,
}

impl ConditionEvaluator for MaxRecordsCondition {
    fn describe_trigger(&self) -> String {
        format!("Max records: {}", self.max_records)
    }

    fn validate(&self, slot: ConditionSlot, _rules: &ConditionRules) -> ConditionResult<()> {
        if self.max_records == 0 {
            return Err(ConditionError::ZeroMaxRecords);
        }
        // progress only exists once a task runs, so it can only stop one
        if slot == ConditionSlot::Starting {
            return Err(ConditionError::UnsupportedSlot {
                kind: "max_records",
                slot,
            });
        }
        Ok(())
    }

    fn trigger_kind(&self) -> TriggerKind {
        TriggerKind::Progress
    }

    fn record_limit(&self) -> Option<u64> {
        Some(self.max_records)
    }
}
