//! An in-memory store whose writes can be made to fail on demand.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use taskrunner_core::database::{InMemoryStore, PersistenceError, PersistenceResult, Store};
use taskrunner_core::models::{ExecutionHandle, ExternalId, Job, JobCondition, Task};
use taskrunner_core::state_machine::TaskStatus;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct FaultyStore {
    inner: InMemoryStore,
    pub fail_insert_handle: AtomicBool,
    pub fail_delete_condition: AtomicBool,
    /// Condition inserts that succeed before the rest fail; `usize::MAX` never fails.
    pub condition_inserts_allowed: AtomicUsize,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            condition_inserts_allowed: AtomicUsize::new(usize::MAX),
            ..Default::default()
        }
    }

    fn injected(operation: &str) -> PersistenceError {
        PersistenceError::Decode(format!("injected {operation} failure"))
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn insert_task(&self, task: &Task) -> PersistenceResult<Task> {
        self.inner.insert_task(task).await
    }

    async fn get_task(&self, task_id: Uuid) -> PersistenceResult<Option<Task>> {
        self.inner.get_task(task_id).await
    }

    async fn update_task(&self, task: &Task) -> PersistenceResult<Task> {
        self.inner.update_task(task).await
    }

    async fn delete_task(&self, task_id: Uuid) -> PersistenceResult<bool> {
        self.inner.delete_task(task_id).await
    }

    async fn list_tasks(&self) -> PersistenceResult<Vec<Task>> {
        self.inner.list_tasks().await
    }

    async fn tasks_for_job(&self, job_id: Uuid) -> PersistenceResult<Vec<Task>> {
        self.inner.tasks_for_job(job_id).await
    }

    async fn latest_task_for_job(&self, job_id: Uuid) -> PersistenceResult<Option<Task>> {
        self.inner.latest_task_for_job(job_id).await
    }

    async fn tasks_with_status(&self, statuses: &[TaskStatus]) -> PersistenceResult<Vec<Task>> {
        self.inner.tasks_with_status(statuses).await
    }

    async fn insert_handle(&self, handle: &ExecutionHandle) -> PersistenceResult<()> {
        if self.fail_insert_handle.load(Ordering::SeqCst) {
            return Err(Self::injected("insert_handle"));
        }
        self.inner.insert_handle(handle).await
    }

    async fn current_handle(&self, task_id: Uuid) -> PersistenceResult<Option<ExecutionHandle>> {
        self.inner.current_handle(task_id).await
    }

    async fn handles_for_task(&self, task_id: Uuid) -> PersistenceResult<Vec<ExecutionHandle>> {
        self.inner.handles_for_task(task_id).await
    }

    async fn find_handle(
        &self,
        external_id: &ExternalId,
    ) -> PersistenceResult<Option<ExecutionHandle>> {
        self.inner.find_handle(external_id).await
    }

    async fn delete_handles(&self, task_id: Uuid) -> PersistenceResult<u64> {
        self.inner.delete_handles(task_id).await
    }

    async fn insert_job(&self, job: &Job) -> PersistenceResult<Job> {
        self.inner.insert_job(job).await
    }

    async fn get_job(&self, job_id: Uuid) -> PersistenceResult<Option<Job>> {
        self.inner.get_job(job_id).await
    }

    async fn update_job(&self, job: &Job) -> PersistenceResult<Job> {
        self.inner.update_job(job).await
    }

    async fn delete_job(&self, job_id: Uuid) -> PersistenceResult<bool> {
        self.inner.delete_job(job_id).await
    }

    async fn list_jobs(&self) -> PersistenceResult<Vec<Job>> {
        self.inner.list_jobs().await
    }

    async fn insert_condition(&self, condition: &JobCondition) -> PersistenceResult<()> {
        let allowed = self
            .condition_inserts_allowed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if allowed.is_err() {
            return Err(Self::injected("insert_condition"));
        }
        self.inner.insert_condition(condition).await
    }

    async fn update_condition(&self, condition: &JobCondition) -> PersistenceResult<()> {
        self.inner.update_condition(condition).await
    }

    async fn delete_condition(&self, condition_id: Uuid) -> PersistenceResult<bool> {
        if self.fail_delete_condition.load(Ordering::SeqCst) {
            return Err(Self::injected("delete_condition"));
        }
        self.inner.delete_condition(condition_id).await
    }

    async fn get_condition(&self, condition_id: Uuid) -> PersistenceResult<Option<JobCondition>> {
        self.inner.get_condition(condition_id).await
    }

    async fn conditions_for_job(&self, job_id: Uuid) -> PersistenceResult<Vec<JobCondition>> {
        self.inner.conditions_for_job(job_id).await
    }
}
