//! PostgreSQL store.
//!
//! Runtime-checked `sqlx` queries over the schema in `migrations/`. Every
//! table carries a `seq` column so recency ordering does not depend on
//! timestamp resolution.

use super::{PersistenceError, PersistenceResult, Store};
use crate::conditions::{Condition, ConditionSlot};
use crate::models::{ExecutionHandle, ExternalId, Job, JobCondition, Task, TaskType};
use crate::scheduler::ScheduleId;
use crate::state_machine::TaskStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

/// Embedded schema migrations.
///
/// Use in tests with: `#[sqlx::test(migrator = "taskrunner_core::database::MIGRATOR")]`
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const TASK_COLUMNS: &str = "task_id, task_type, status, step, debug_mode, log_path, job_id, \
     parent_task_id, owner, max_records, created_at, started_at, stopped_at, resumed_at, \
     finished_at, version";

const JOB_COLUMNS: &str = "job_id, name, task_type, enabled, continue_mode, owner, \
     parent_job_id, parent_task_id, created_at, updated_at, version";

const CONDITION_COLUMNS: &str = "condition_id, job_id, slot, definition, schedule_id";

const HANDLE_COLUMNS: &str = "handle_id, task_id, external_id, created_at";

#[derive(Debug, FromRow)]
struct TaskRow {
    task_id: Uuid,
    task_type: String,
    status: String,
    step: i64,
    debug_mode: bool,
    log_path: Option<String>,
    job_id: Option<Uuid>,
    parent_task_id: Option<Uuid>,
    owner: Option<String>,
    max_records: Option<i64>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    resumed_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    version: i64,
}

impl TryFrom<TaskRow> for Task {
    type Error = PersistenceError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(Task {
            task_id: row.task_id,
            task_type: TaskType::from_str(&row.task_type).map_err(PersistenceError::Decode)?,
            status: TaskStatus::from_str(&row.status).map_err(PersistenceError::Decode)?,
            step: row.step,
            debug_mode: row.debug_mode,
            log_path: row.log_path,
            job_id: row.job_id,
            parent_task_id: row.parent_task_id,
            owner: row.owner,
            max_records: row.max_records,
            created_at: row.created_at,
            started_at: row.started_at,
            stopped_at: row.stopped_at,
            resumed_at: row.resumed_at,
            finished_at: row.finished_at,
            version: row.version,
        })
    }
}

#[derive(Debug, FromRow)]
struct JobRow {
    job_id: Uuid,
    name: String,
    task_type: String,
    enabled: bool,
    continue_mode: bool,
    owner: Option<String>,
    parent_job_id: Option<Uuid>,
    parent_task_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl TryFrom<JobRow> for Job {
    type Error = PersistenceError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            job_id: row.job_id,
            name: row.name,
            task_type: TaskType::from_str(&row.task_type).map_err(PersistenceError::Decode)?,
            enabled: row.enabled,
            continue_mode: row.continue_mode,
            owner: row.owner,
            parent_job_id: row.parent_job_id,
            parent_task_id: row.parent_task_id,
            starting_condition: None,
            stopping_condition: None,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        })
    }
}

#[derive(Debug, FromRow)]
struct ConditionRow {
    condition_id: Uuid,
    job_id: Uuid,
    slot: String,
    definition: Json<Condition>,
    schedule_id: Option<Uuid>,
}

impl TryFrom<ConditionRow> for JobCondition {
    type Error = PersistenceError;

    fn try_from(row: ConditionRow) -> Result<Self, Self::Error> {
        Ok(JobCondition {
            condition_id: row.condition_id,
            job_id: row.job_id,
            slot: ConditionSlot::from_str(&row.slot).map_err(PersistenceError::Decode)?,
            condition: row.definition.0,
            schedule_id: row.schedule_id.map(ScheduleId),
        })
    }
}

#[derive(Debug, FromRow)]
struct HandleRow {
    handle_id: Uuid,
    task_id: Uuid,
    external_id: String,
    created_at: DateTime<Utc>,
}

impl From<HandleRow> for ExecutionHandle {
    fn from(row: HandleRow) -> Self {
        ExecutionHandle {
            handle_id: row.handle_id,
            task_id: row.task_id,
            external_id: ExternalId::new(row.external_id),
            created_at: row.created_at,
        }
    }
}

/// Map driver errors for constraint violations onto persistence errors.
fn classify(err: sqlx::Error, entity: &'static str, id: Uuid) -> PersistenceError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return PersistenceError::UniqueViolation {
                constraint: db.constraint().unwrap_or("unknown").to_string(),
            };
        }
        if db.is_foreign_key_violation() {
            return PersistenceError::StillReferenced { entity, id };
        }
    }
    PersistenceError::Database(err)
}

fn collect<R, T>(rows: Vec<R>) -> PersistenceResult<Vec<T>>
where
    T: TryFrom<R, Error = PersistenceError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> PersistenceResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> PersistenceResult<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| PersistenceError::Database(e.into()))?;
        info!("Database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn task_exists(&self, task_id: Uuid) -> PersistenceResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM taskrunner_tasks WHERE task_id = $1)")
                .bind(task_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn job_exists(&self, job_id: Uuid) -> PersistenceResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM taskrunner_jobs WHERE job_id = $1)")
                .bind(job_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn attach_conditions(&self, mut job: Job) -> PersistenceResult<Job> {
        for condition in self.conditions_for_job(job.job_id).await? {
            match condition.slot {
                ConditionSlot::Starting => job.starting_condition = Some(condition),
                ConditionSlot::Stopping => job.stopping_condition = Some(condition),
            }
        }
        Ok(job)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_task(&self, task: &Task) -> PersistenceResult<Task> {
        let sql = format!(
            "INSERT INTO taskrunner_tasks ({TASK_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             RETURNING {TASK_COLUMNS}"
        );
        let row = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(task.task_id)
            .bind(task.task_type.as_str())
            .bind(task.status.as_str())
            .bind(task.step)
            .bind(task.debug_mode)
            .bind(&task.log_path)
            .bind(task.job_id)
            .bind(task.parent_task_id)
            .bind(&task.owner)
            .bind(task.max_records)
            .bind(task.created_at)
            .bind(task.started_at)
            .bind(task.stopped_at)
            .bind(task.resumed_at)
            .bind(task.finished_at)
            .bind(task.version)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify(e, "Task", task.task_id))?;
        row.try_into()
    }

    async fn get_task(&self, task_id: Uuid) -> PersistenceResult<Option<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM taskrunner_tasks WHERE task_id = $1");
        sqlx::query_as::<_, TaskRow>(&sql)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Task::try_from)
            .transpose()
    }

    async fn update_task(&self, task: &Task) -> PersistenceResult<Task> {
        let sql = format!(
            "UPDATE taskrunner_tasks SET \
                 task_type = $3, status = $4, step = $5, debug_mode = $6, log_path = $7, \
                 job_id = $8, parent_task_id = $9, owner = $10, max_records = $11, \
                 started_at = $12, stopped_at = $13, resumed_at = $14, finished_at = $15, \
                 version = version + 1 \
             WHERE task_id = $1 AND version = $2 \
             RETURNING {TASK_COLUMNS}"
        );
        let row = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(task.task_id)
            .bind(task.version)
            .bind(task.task_type.as_str())
            .bind(task.status.as_str())
            .bind(task.step)
            .bind(task.debug_mode)
            .bind(&task.log_path)
            .bind(task.job_id)
            .bind(task.parent_task_id)
            .bind(&task.owner)
            .bind(task.max_records)
            .bind(task.started_at)
            .bind(task.stopped_at)
            .bind(task.resumed_at)
            .bind(task.finished_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(e, "Task", task.task_id))?;

        match row {
            Some(row) => row.try_into(),
            None if self.task_exists(task.task_id).await? => {
                Err(PersistenceError::ConcurrentModification {
                    entity: "Task",
                    id: task.task_id,
                })
            }
            None => Err(PersistenceError::NotFound {
                entity: "Task",
                id: task.task_id,
            }),
        }
    }

    async fn delete_task(&self, task_id: Uuid) -> PersistenceResult<bool> {
        let result = sqlx::query("DELETE FROM taskrunner_tasks WHERE task_id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_tasks(&self) -> PersistenceResult<Vec<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM taskrunner_tasks ORDER BY seq DESC");
        let rows = sqlx::query_as::<_, TaskRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        collect(rows)
    }

    async fn tasks_for_job(&self, job_id: Uuid) -> PersistenceResult<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM taskrunner_tasks WHERE job_id = $1 ORDER BY seq DESC"
        );
        let rows = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;
        collect(rows)
    }

    async fn latest_task_for_job(&self, job_id: Uuid) -> PersistenceResult<Option<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM taskrunner_tasks WHERE job_id = $1 \
             ORDER BY seq DESC LIMIT 1"
        );
        sqlx::query_as::<_, TaskRow>(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Task::try_from)
            .transpose()
    }

    async fn tasks_with_status(&self, statuses: &[TaskStatus]) -> PersistenceResult<Vec<Task>> {
        let names: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM taskrunner_tasks WHERE status = ANY($1) ORDER BY seq DESC"
        );
        let rows = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(names)
            .fetch_all(&self.pool)
            .await?;
        collect(rows)
    }

    async fn insert_handle(&self, handle: &ExecutionHandle) -> PersistenceResult<()> {
        sqlx::query(
            "INSERT INTO taskrunner_execution_handles (handle_id, task_id, external_id, created_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(handle.handle_id)
        .bind(handle.task_id)
        .bind(handle.external_id.as_str())
        .bind(handle.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match classify(e, "Task", handle.task_id) {
            PersistenceError::StillReferenced { id, .. } => {
                PersistenceError::NotFound { entity: "Task", id }
            }
            other => other,
        })?;
        Ok(())
    }

    async fn current_handle(&self, task_id: Uuid) -> PersistenceResult<Option<ExecutionHandle>> {
        let sql = format!(
            "SELECT {HANDLE_COLUMNS} FROM taskrunner_execution_handles WHERE task_id = $1 \
             ORDER BY seq DESC LIMIT 1"
        );
        let row = sqlx::query_as::<_, HandleRow>(&sql)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ExecutionHandle::from))
    }

    async fn handles_for_task(&self, task_id: Uuid) -> PersistenceResult<Vec<ExecutionHandle>> {
        let sql = format!(
            "SELECT {HANDLE_COLUMNS} FROM taskrunner_execution_handles WHERE task_id = $1 \
             ORDER BY seq ASC"
        );
        let rows = sqlx::query_as::<_, HandleRow>(&sql)
            .bind(task_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(ExecutionHandle::from).collect())
    }

    async fn find_handle(
        &self,
        external_id: &ExternalId,
    ) -> PersistenceResult<Option<ExecutionHandle>> {
        let sql = format!(
            "SELECT {HANDLE_COLUMNS} FROM taskrunner_execution_handles WHERE external_id = $1 \
             ORDER BY seq DESC LIMIT 1"
        );
        let row = sqlx::query_as::<_, HandleRow>(&sql)
            .bind(external_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ExecutionHandle::from))
    }

    async fn delete_handles(&self, task_id: Uuid) -> PersistenceResult<u64> {
        let result = sqlx::query("DELETE FROM taskrunner_execution_handles WHERE task_id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_job(&self, job: &Job) -> PersistenceResult<Job> {
        let sql = format!(
            "INSERT INTO taskrunner_jobs ({JOB_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(job.job_id)
            .bind(&job.name)
            .bind(job.task_type.as_str())
            .bind(job.enabled)
            .bind(job.continue_mode)
            .bind(&job.owner)
            .bind(job.parent_job_id)
            .bind(job.parent_task_id)
            .bind(job.created_at)
            .bind(job.updated_at)
            .bind(job.version)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify(e, "Job", job.job_id))?;
        row.try_into()
    }

    async fn get_job(&self, job_id: Uuid) -> PersistenceResult<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM taskrunner_jobs WHERE job_id = $1");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.attach_conditions(row.try_into()?).await?)),
            None => Ok(None),
        }
    }

    async fn update_job(&self, job: &Job) -> PersistenceResult<Job> {
        let sql = format!(
            "UPDATE taskrunner_jobs SET \
                 name = $3, task_type = $4, enabled = $5, continue_mode = $6, owner = $7, \
                 parent_job_id = $8, parent_task_id = $9, updated_at = NOW(), \
                 version = version + 1 \
             WHERE job_id = $1 AND version = $2 \
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(job.job_id)
            .bind(job.version)
            .bind(&job.name)
            .bind(job.task_type.as_str())
            .bind(job.enabled)
            .bind(job.continue_mode)
            .bind(&job.owner)
            .bind(job.parent_job_id)
            .bind(job.parent_task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(e, "Job", job.job_id))?;

        match row {
            Some(row) => self.attach_conditions(row.try_into()?).await,
            None if self.job_exists(job.job_id).await? => {
                Err(PersistenceError::ConcurrentModification {
                    entity: "Job",
                    id: job.job_id,
                })
            }
            None => Err(PersistenceError::NotFound {
                entity: "Job",
                id: job.job_id,
            }),
        }
    }

    async fn delete_job(&self, job_id: Uuid) -> PersistenceResult<bool> {
        let result = sqlx::query("DELETE FROM taskrunner_jobs WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(|e| classify(e, "Job", job_id))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_jobs(&self) -> PersistenceResult<Vec<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM taskrunner_jobs ORDER BY seq DESC");
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            jobs.push(self.attach_conditions(row.try_into()?).await?);
        }
        Ok(jobs)
    }

    async fn insert_condition(&self, condition: &JobCondition) -> PersistenceResult<()> {
        sqlx::query(
            "INSERT INTO taskrunner_job_conditions (condition_id, job_id, slot, definition, schedule_id) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(condition.condition_id)
        .bind(condition.job_id)
        .bind(condition.slot.as_str())
        .bind(Json(&condition.condition))
        .bind(condition.schedule_id.map(|id| id.0))
        .execute(&self.pool)
        .await
        .map_err(|e| match classify(e, "Job", condition.job_id) {
            PersistenceError::StillReferenced { id, .. } => {
                PersistenceError::NotFound { entity: "Job", id }
            }
            other => other,
        })?;
        Ok(())
    }

    async fn update_condition(&self, condition: &JobCondition) -> PersistenceResult<()> {
        let result = sqlx::query(
            "UPDATE taskrunner_job_conditions SET definition = $2, schedule_id = $3 \
             WHERE condition_id = $1",
        )
        .bind(condition.condition_id)
        .bind(Json(&condition.condition))
        .bind(condition.schedule_id.map(|id| id.0))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::NotFound {
                entity: "Condition",
                id: condition.condition_id,
            });
        }
        Ok(())
    }

    async fn delete_condition(&self, condition_id: Uuid) -> PersistenceResult<bool> {
        let result = sqlx::query("DELETE FROM taskrunner_job_conditions WHERE condition_id = $1")
            .bind(condition_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_condition(&self, condition_id: Uuid) -> PersistenceResult<Option<JobCondition>> {
        let sql = format!(
            "SELECT {CONDITION_COLUMNS} FROM taskrunner_job_conditions WHERE condition_id = $1"
        );
        sqlx::query_as::<_, ConditionRow>(&sql)
            .bind(condition_id)
            .fetch_optional(&self.pool)
            .await?
            .map(JobCondition::try_from)
            .transpose()
    }

    async fn conditions_for_job(&self, job_id: Uuid) -> PersistenceResult<Vec<JobCondition>> {
        let sql = format!(
            "SELECT {CONDITION_COLUMNS} FROM taskrunner_job_conditions WHERE job_id = $1 \
             ORDER BY slot"
        );
        let rows = sqlx::query_as::<_, ConditionRow>(&sql)
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;
        collect(rows)
    }
}
