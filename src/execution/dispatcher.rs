//! Dispatcher and Tokio worker pool.
//!
//! The control plane hands a [`WorkloadRequest`] to a [`Dispatcher`] and gets
//! back the [`ExternalId`] of the queued execution. Completion is reported
//! asynchronously through the request's [`DispatchCallbacks`]. Termination is
//! cooperative: the workload observes its [`CancellationToken`] between units
//! of work.

use crate::models::ExternalId;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Dispatcher is shut down")]
    ShutDown,

    #[error("Dispatch failed: {0}")]
    Internal(String),
}

pub type DispatchResult<T> = Result<T, DispatchError>;

/// How a workload ended when it did not raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadOutcome {
    /// Reached the type's maximum count
    Completed,
    /// Observed a termination request
    Interrupted,
    /// Found the task moved on without it (status changed or newer handle)
    Superseded,
    /// Raised the owning job's stop signal at its record limit
    RecordLimitReached,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkloadError {
    #[error("{0}")]
    ForcedFailure(String),

    #[error("Workload panicked: {0}")]
    Panicked(String),

    #[error("Workload error: {0}")]
    Internal(String),
}

impl From<crate::error::TaskRunnerError> for WorkloadError {
    fn from(err: crate::error::TaskRunnerError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<crate::state_machine::StateMachineError> for WorkloadError {
    fn from(err: crate::state_machine::StateMachineError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<crate::log_sink::LogSinkError> for WorkloadError {
    fn from(err: crate::log_sink::LogSinkError) -> Self {
        Self::Internal(err.to_string())
    }
}

/// What a running workload knows about its own execution.
#[derive(Debug, Clone)]
pub struct WorkloadContext {
    pub external_id: ExternalId,
    pub cancellation: CancellationToken,
}

pub type WorkloadFuture = BoxFuture<'static, Result<WorkloadOutcome, WorkloadError>>;
pub type WorkloadFn = Box<dyn FnOnce(WorkloadContext) -> WorkloadFuture + Send>;

/// Completion hooks invoked by the dispatcher once an execution ends.
#[async_trait]
pub trait DispatchCallbacks: Send + Sync {
    async fn on_success(&self, external_id: ExternalId, outcome: WorkloadOutcome);

    async fn on_failure(&self, external_id: ExternalId, error: WorkloadError);
}

pub struct WorkloadRequest {
    pub task_id: Uuid,
    pub continue_mode: bool,
    pub workload: WorkloadFn,
    pub callbacks: Arc<dyn DispatchCallbacks>,
}

impl std::fmt::Debug for WorkloadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadRequest")
            .field("task_id", &self.task_id)
            .field("continue_mode", &self.continue_mode)
            .finish_non_exhaustive()
    }
}

/// Queue that executes workloads out of the caller's control flow.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn enqueue(&self, request: WorkloadRequest) -> DispatchResult<ExternalId>;

    /// Request termination. Returns whether a live execution was signalled;
    /// unknown or finished executions are not an error.
    async fn terminate(&self, external_id: &ExternalId) -> DispatchResult<bool>;

    /// Whether the execution is queued or running.
    fn is_live(&self, external_id: &ExternalId) -> bool;
}

/// Execution counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub enqueued: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub active: usize,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Bounded in-process worker pool on the Tokio runtime.
#[derive(Clone)]
pub struct TokioDispatcher {
    semaphore: Arc<Semaphore>,
    executions: Arc<DashMap<ExternalId, CancellationToken>>,
    shutdown: CancellationToken,
    idle: Arc<Notify>,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for TokioDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioDispatcher")
            .field("available_permits", &self.semaphore.available_permits())
            .field("active", &self.executions.len())
            .finish()
    }
}

impl TokioDispatcher {
    pub fn new(worker_concurrency: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(worker_concurrency.max(1))),
            executions: Arc::new(DashMap::new()),
            shutdown: CancellationToken::new(),
            idle: Arc::new(Notify::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Executions queued or running.
    pub fn active_count(&self) -> usize {
        self.executions.len()
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            active: self.executions.len(),
        }
    }

    /// Refuse new work, signal every live execution and wait up to `grace`
    /// for them to drain.
    pub async fn shutdown(&self, grace: Duration) {
        self.shutdown.cancel();
        let drained = tokio::time::timeout(grace, async {
            while !self.executions.is_empty() {
                let notified = self.idle.notified();
                if self.executions.is_empty() {
                    break;
                }
                notified.await;
            }
        })
        .await;

        match drained {
            Ok(()) => info!("Dispatcher drained"),
            Err(_) => warn!(
                remaining = self.executions.len(),
                "Dispatcher shutdown grace period elapsed"
            ),
        }
    }
}

#[async_trait]
impl Dispatcher for TokioDispatcher {
    async fn enqueue(&self, request: WorkloadRequest) -> DispatchResult<ExternalId> {
        if self.shutdown.is_cancelled() {
            return Err(DispatchError::ShutDown);
        }

        let external_id = ExternalId::generate();
        let token = self.shutdown.child_token();
        self.executions.insert(external_id.clone(), token.clone());
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);

        let WorkloadRequest {
            task_id,
            workload,
            callbacks,
            ..
        } = request;
        let semaphore = Arc::clone(&self.semaphore);
        let executions = Arc::clone(&self.executions);
        let idle = Arc::clone(&self.idle);
        let counters = Arc::clone(&self.counters);
        let id = external_id.clone();

        tokio::spawn(async move {
            let permit = tokio::select! {
                permit = semaphore.acquire_owned() => permit.ok(),
                _ = token.cancelled() => None,
            };

            let result = match permit {
                // terminated before a worker picked it up
                None => Ok(WorkloadOutcome::Interrupted),
                Some(_permit) => {
                    debug!(task_id = %task_id, external_id = %id, "Execution started");
                    let context = WorkloadContext {
                        external_id: id.clone(),
                        cancellation: token.clone(),
                    };
                    // run on its own task so a panic surfaces as a JoinError
                    match tokio::spawn(workload(context)).await {
                        Ok(result) => result,
                        Err(join_error) => Err(WorkloadError::Panicked(join_error.to_string())),
                    }
                }
            };

            executions.remove(&id);
            idle.notify_waiters();

            match result {
                Ok(outcome) => {
                    counters.succeeded.fetch_add(1, Ordering::Relaxed);
                    debug!(task_id = %task_id, external_id = %id, ?outcome, "Execution ended");
                    callbacks.on_success(id, outcome).await;
                }
                Err(err) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!(task_id = %task_id, external_id = %id, error = %err, "Execution failed");
                    callbacks.on_failure(id, err).await;
                }
            }
        });

        Ok(external_id)
    }

    async fn terminate(&self, external_id: &ExternalId) -> DispatchResult<bool> {
        match self.executions.get(external_id) {
            Some(token) => {
                token.cancel();
                debug!(external_id = %external_id, "Termination requested");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn is_live(&self, external_id: &ExternalId) -> bool {
        self.executions.contains_key(external_id)
    }
}
