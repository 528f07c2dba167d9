use crate::conditions::{Condition, ConditionSlot};
use crate::scheduler::ScheduleId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A condition bound to one slot of one Job. Never shared between jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCondition {
    pub condition_id: Uuid,
    pub job_id: Uuid,
    pub slot: ConditionSlot,
    pub condition: Condition,
    /// Recurring registration owned by a time condition, once provisioned
    pub schedule_id: Option<ScheduleId>,
}

impl JobCondition {
    pub fn new(job_id: Uuid, slot: ConditionSlot, condition: Condition) -> Self {
        Self {
            condition_id: Uuid::new_v4(),
            job_id,
            slot,
            condition,
            schedule_id: None,
        }
    }
}
