//! Execution Handle Registry.
//!
//! A task accumulates one handle per dispatch. The newest handle is the
//! current one and the only one ever targeted for termination. Termination is
//! best effort: dispatcher errors are logged and reported as "not signalled".

use crate::database::{PersistenceResult, Store};
use crate::execution::Dispatcher;
use crate::models::{ExecutionHandle, ExternalId};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct HandleRegistry {
    store: Arc<dyn Store>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl std::fmt::Debug for HandleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleRegistry").finish_non_exhaustive()
    }
}

impl HandleRegistry {
    pub fn new(store: Arc<dyn Store>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self { store, dispatcher }
    }

    /// Append a handle; it becomes the task's current one.
    pub async fn record(
        &self,
        task_id: Uuid,
        external_id: ExternalId,
    ) -> PersistenceResult<ExecutionHandle> {
        let handle = ExecutionHandle::new(task_id, external_id);
        self.store.insert_handle(&handle).await?;
        debug!(task_id = %task_id, external_id = %handle.external_id, "Recorded execution handle");
        Ok(handle)
    }

    pub async fn current(&self, task_id: Uuid) -> PersistenceResult<Option<ExecutionHandle>> {
        self.store.current_handle(task_id).await
    }

    /// Every handle of the task, oldest first.
    pub async fn history(&self, task_id: Uuid) -> PersistenceResult<Vec<ExecutionHandle>> {
        self.store.handles_for_task(task_id).await
    }

    pub async fn is_current(
        &self,
        task_id: Uuid,
        external_id: &ExternalId,
    ) -> PersistenceResult<bool> {
        Ok(self
            .current(task_id)
            .await?
            .is_some_and(|h| &h.external_id == external_id))
    }

    pub async fn find_by_external_id(
        &self,
        external_id: &ExternalId,
    ) -> PersistenceResult<Option<ExecutionHandle>> {
        self.store.find_handle(external_id).await
    }

    pub fn is_live(&self, handle: &ExecutionHandle) -> bool {
        self.dispatcher.is_live(&handle.external_id)
    }

    /// Ask the dispatcher to stop this execution.
    pub async fn terminate(&self, handle: &ExecutionHandle) -> bool {
        match self.dispatcher.terminate(&handle.external_id).await {
            Ok(signalled) => {
                debug!(
                    task_id = %handle.task_id,
                    external_id = %handle.external_id,
                    signalled,
                    "Terminate requested"
                );
                signalled
            }
            Err(e) => {
                warn!(
                    task_id = %handle.task_id,
                    external_id = %handle.external_id,
                    error = %e,
                    "Terminate failed; continuing"
                );
                false
            }
        }
    }

    /// Terminate the task's current handle, if it has one.
    pub async fn terminate_current(&self, task_id: Uuid) -> PersistenceResult<bool> {
        match self.current(task_id).await? {
            Some(handle) => Ok(self.terminate(&handle).await),
            None => Ok(false),
        }
    }

    pub async fn forget(&self, task_id: Uuid) -> PersistenceResult<u64> {
        self.store.delete_handles(task_id).await
    }
}
