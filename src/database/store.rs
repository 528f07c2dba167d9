use super::PersistenceResult;
use crate::models::{ExecutionHandle, ExternalId, Job, JobCondition, Task};
use crate::state_machine::TaskStatus;
use async_trait::async_trait;
use uuid::Uuid;

/// Storage contract shared by the control plane and the workload executor.
///
/// List operations on tasks return newest first. Handle history is returned
/// oldest first, so the last element is the current handle.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn insert_task(&self, task: &Task) -> PersistenceResult<Task>;

    async fn get_task(&self, task_id: Uuid) -> PersistenceResult<Option<Task>>;

    /// Persist `task` if the stored version equals `task.version`. Returns the
    /// stored row with its bumped version.
    async fn update_task(&self, task: &Task) -> PersistenceResult<Task>;

    async fn delete_task(&self, task_id: Uuid) -> PersistenceResult<bool>;

    async fn list_tasks(&self) -> PersistenceResult<Vec<Task>>;

    async fn tasks_for_job(&self, job_id: Uuid) -> PersistenceResult<Vec<Task>>;

    async fn latest_task_for_job(&self, job_id: Uuid) -> PersistenceResult<Option<Task>>;

    async fn tasks_with_status(&self, statuses: &[TaskStatus]) -> PersistenceResult<Vec<Task>>;

    async fn insert_handle(&self, handle: &ExecutionHandle) -> PersistenceResult<()>;

    async fn current_handle(&self, task_id: Uuid) -> PersistenceResult<Option<ExecutionHandle>>;

    async fn handles_for_task(&self, task_id: Uuid) -> PersistenceResult<Vec<ExecutionHandle>>;

    async fn find_handle(&self, external_id: &ExternalId)
        -> PersistenceResult<Option<ExecutionHandle>>;

    async fn delete_handles(&self, task_id: Uuid) -> PersistenceResult<u64>;

    /// Fails with `UniqueViolation` when the name is taken. Conditions are
    /// stored separately.
    async fn insert_job(&self, job: &Job) -> PersistenceResult<Job>;

    /// Job row with its conditions attached.
    async fn get_job(&self, job_id: Uuid) -> PersistenceResult<Option<Job>>;

    /// Version-checked like `update_task`. Conditions are not touched.
    async fn update_job(&self, job: &Job) -> PersistenceResult<Job>;

    /// Fails with `StillReferenced` while conditions remain.
    async fn delete_job(&self, job_id: Uuid) -> PersistenceResult<bool>;

    async fn list_jobs(&self) -> PersistenceResult<Vec<Job>>;

    async fn insert_condition(&self, condition: &JobCondition) -> PersistenceResult<()>;

    async fn update_condition(&self, condition: &JobCondition) -> PersistenceResult<()>;

    async fn delete_condition(&self, condition_id: Uuid) -> PersistenceResult<bool>;

    async fn get_condition(&self, condition_id: Uuid) -> PersistenceResult<Option<JobCondition>>;

    async fn conditions_for_job(&self, job_id: Uuid) -> PersistenceResult<Vec<JobCondition>>;
}
