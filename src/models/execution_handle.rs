use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier the dispatcher assigns to one queued execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalId(String);

impl ExternalId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One dispatch attempt of a task. The most recently created handle is the
/// task's current one; older handles are kept as history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionHandle {
    pub handle_id: Uuid,
    pub task_id: Uuid,
    pub external_id: ExternalId,
    pub created_at: DateTime<Utc>,
}

impl ExecutionHandle {
    pub fn new(task_id: Uuid, external_id: ExternalId) -> Self {
        Self {
            handle_id: Uuid::new_v4(),
            task_id,
            external_id,
            created_at: Utc::now(),
        }
    }
}

impl fmt::Display for ExecutionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Execution Handle: {}", self.external_id)
    }
}
