//! DashMap-backed store.
//!
//! Insertion order is tracked with a monotonically increasing sequence so
//! "newest first" and "current handle" do not depend on clock resolution.

use super::{PersistenceError, PersistenceResult, Store};
use crate::conditions::ConditionSlot;
use crate::models::{ExecutionHandle, ExternalId, Job, JobCondition, Task};
use crate::state_machine::TaskStatus;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Sequenced<T> {
    seq: u64,
    value: T,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    sequence: AtomicU64,
    tasks: DashMap<Uuid, Sequenced<Task>>,
    handles: DashMap<Uuid, Vec<ExecutionHandle>>,
    jobs: DashMap<Uuid, Sequenced<Job>>,
    job_names: DashMap<String, Uuid>,
    conditions: DashMap<Uuid, JobCondition>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    fn newest_first<T: Clone>(mut rows: Vec<Sequenced<T>>) -> Vec<T> {
        rows.sort_by(|a, b| b.seq.cmp(&a.seq));
        rows.into_iter().map(|r| r.value).collect()
    }

    fn attach_conditions(&self, mut job: Job) -> Job {
        job.starting_condition = None;
        job.stopping_condition = None;
        for condition in self.conditions.iter().filter(|c| c.job_id == job.job_id) {
            match condition.slot {
                ConditionSlot::Starting => job.starting_condition = Some(condition.clone()),
                ConditionSlot::Stopping => job.stopping_condition = Some(condition.clone()),
            }
        }
        job
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_task(&self, task: &Task) -> PersistenceResult<Task> {
        let seq = self.next_seq();
        match self.tasks.entry(task.task_id) {
            Entry::Occupied(_) => Err(PersistenceError::UniqueViolation {
                constraint: "tasks_pkey".to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(Sequenced {
                    seq,
                    value: task.clone(),
                });
                Ok(task.clone())
            }
        }
    }

    async fn get_task(&self, task_id: Uuid) -> PersistenceResult<Option<Task>> {
        Ok(self.tasks.get(&task_id).map(|r| r.value.clone()))
    }

    async fn update_task(&self, task: &Task) -> PersistenceResult<Task> {
        let mut stored = self
            .tasks
            .get_mut(&task.task_id)
            .ok_or(PersistenceError::NotFound {
                entity: "Task",
                id: task.task_id,
            })?;

        if stored.value.version != task.version {
            return Err(PersistenceError::ConcurrentModification {
                entity: "Task",
                id: task.task_id,
            });
        }

        let mut next = task.clone();
        next.version += 1;
        stored.value = next.clone();
        Ok(next)
    }

    async fn delete_task(&self, task_id: Uuid) -> PersistenceResult<bool> {
        self.handles.remove(&task_id);
        Ok(self.tasks.remove(&task_id).is_some())
    }

    async fn list_tasks(&self) -> PersistenceResult<Vec<Task>> {
        let rows = self.tasks.iter().map(|r| r.value().clone()).collect();
        Ok(Self::newest_first(rows))
    }

    async fn tasks_for_job(&self, job_id: Uuid) -> PersistenceResult<Vec<Task>> {
        let rows = self
            .tasks
            .iter()
            .filter(|r| r.value.job_id == Some(job_id))
            .map(|r| r.value().clone())
            .collect();
        Ok(Self::newest_first(rows))
    }

    async fn latest_task_for_job(&self, job_id: Uuid) -> PersistenceResult<Option<Task>> {
        Ok(self
            .tasks
            .iter()
            .filter(|r| r.value.job_id == Some(job_id))
            .max_by_key(|r| r.seq)
            .map(|r| r.value.clone()))
    }

    async fn tasks_with_status(&self, statuses: &[TaskStatus]) -> PersistenceResult<Vec<Task>> {
        let rows = self
            .tasks
            .iter()
            .filter(|r| statuses.contains(&r.value.status))
            .map(|r| r.value().clone())
            .collect();
        Ok(Self::newest_first(rows))
    }

    async fn insert_handle(&self, handle: &ExecutionHandle) -> PersistenceResult<()> {
        if !self.tasks.contains_key(&handle.task_id) {
            return Err(PersistenceError::NotFound {
                entity: "Task",
                id: handle.task_id,
            });
        }
        self.handles
            .entry(handle.task_id)
            .or_default()
            .push(handle.clone());
        Ok(())
    }

    async fn current_handle(&self, task_id: Uuid) -> PersistenceResult<Option<ExecutionHandle>> {
        Ok(self
            .handles
            .get(&task_id)
            .and_then(|history| history.last().cloned()))
    }

    async fn handles_for_task(&self, task_id: Uuid) -> PersistenceResult<Vec<ExecutionHandle>> {
        Ok(self
            .handles
            .get(&task_id)
            .map(|history| history.clone())
            .unwrap_or_default())
    }

    async fn find_handle(
        &self,
        external_id: &ExternalId,
    ) -> PersistenceResult<Option<ExecutionHandle>> {
        Ok(self.handles.iter().find_map(|history| {
            history
                .iter()
                .find(|h| &h.external_id == external_id)
                .cloned()
        }))
    }

    async fn delete_handles(&self, task_id: Uuid) -> PersistenceResult<u64> {
        Ok(self
            .handles
            .remove(&task_id)
            .map_or(0, |(_, history)| history.len() as u64))
    }

    async fn insert_job(&self, job: &Job) -> PersistenceResult<Job> {
        match self.job_names.entry(job.name.clone()) {
            Entry::Occupied(_) => {
                return Err(PersistenceError::UniqueViolation {
                    constraint: "jobs_name_key".to_string(),
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(job.job_id);
            }
        }

        let mut row = job.clone();
        row.starting_condition = None;
        row.stopping_condition = None;
        let seq = self.next_seq();
        self.jobs.insert(job.job_id, Sequenced { seq, value: row });
        Ok(job.clone())
    }

    async fn get_job(&self, job_id: Uuid) -> PersistenceResult<Option<Job>> {
        let row = self.jobs.get(&job_id).map(|r| r.value.clone());
        Ok(row.map(|job| self.attach_conditions(job)))
    }

    async fn update_job(&self, job: &Job) -> PersistenceResult<Job> {
        let previous_name = {
            let stored = self.jobs.get(&job.job_id).ok_or(PersistenceError::NotFound {
                entity: "Job",
                id: job.job_id,
            })?;
            if stored.value.version != job.version {
                return Err(PersistenceError::ConcurrentModification {
                    entity: "Job",
                    id: job.job_id,
                });
            }
            stored.value.name.clone()
        };

        if previous_name != job.name {
            match self.job_names.entry(job.name.clone()) {
                Entry::Occupied(_) => {
                    return Err(PersistenceError::UniqueViolation {
                        constraint: "jobs_name_key".to_string(),
                    })
                }
                Entry::Vacant(slot) => {
                    slot.insert(job.job_id);
                }
            }
            self.job_names.remove(&previous_name);
        }

        let mut stored = self.jobs.get_mut(&job.job_id).ok_or(PersistenceError::NotFound {
            entity: "Job",
            id: job.job_id,
        })?;
        if stored.value.version != job.version {
            return Err(PersistenceError::ConcurrentModification {
                entity: "Job",
                id: job.job_id,
            });
        }
        let mut next = job.clone();
        next.version += 1;
        next.updated_at = Utc::now();
        next.starting_condition = None;
        next.stopping_condition = None;
        stored.value = next.clone();
        drop(stored);

        Ok(self.attach_conditions(next))
    }

    async fn delete_job(&self, job_id: Uuid) -> PersistenceResult<bool> {
        if self.conditions.iter().any(|c| c.job_id == job_id) {
            return Err(PersistenceError::StillReferenced {
                entity: "Job",
                id: job_id,
            });
        }
        match self.jobs.remove(&job_id) {
            Some((_, row)) => {
                self.job_names.remove(&row.value.name);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_jobs(&self) -> PersistenceResult<Vec<Job>> {
        let rows = self.jobs.iter().map(|r| r.value().clone()).collect();
        Ok(Self::newest_first(rows)
            .into_iter()
            .map(|job| self.attach_conditions(job))
            .collect())
    }

    async fn insert_condition(&self, condition: &JobCondition) -> PersistenceResult<()> {
        if !self.jobs.contains_key(&condition.job_id) {
            return Err(PersistenceError::NotFound {
                entity: "Job",
                id: condition.job_id,
            });
        }
        let slot_taken = self
            .conditions
            .iter()
            .any(|c| c.job_id == condition.job_id && c.slot == condition.slot);
        if slot_taken {
            return Err(PersistenceError::UniqueViolation {
                constraint: "job_conditions_job_id_slot_key".to_string(),
            });
        }
        self.conditions
            .insert(condition.condition_id, condition.clone());
        Ok(())
    }

    async fn update_condition(&self, condition: &JobCondition) -> PersistenceResult<()> {
        let mut stored =
            self.conditions
                .get_mut(&condition.condition_id)
                .ok_or(PersistenceError::NotFound {
                    entity: "Condition",
                    id: condition.condition_id,
                })?;
        *stored = condition.clone();
        Ok(())
    }

    async fn delete_condition(&self, condition_id: Uuid) -> PersistenceResult<bool> {
        Ok(self.conditions.remove(&condition_id).is_some())
    }

    async fn get_condition(&self, condition_id: Uuid) -> PersistenceResult<Option<JobCondition>> {
        Ok(self.conditions.get(&condition_id).map(|c| c.clone()))
    }

    async fn conditions_for_job(&self, job_id: Uuid) -> PersistenceResult<Vec<JobCondition>> {
        let mut conditions: Vec<JobCondition> = self
            .conditions
            .iter()
            .filter(|c| c.job_id == job_id)
            .map(|c| c.clone())
            .collect();
        conditions.sort_by_key(|c| c.slot.as_str());
        Ok(conditions)
    }
}
