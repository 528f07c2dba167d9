//! Shared system dependencies.
//!
//! [`SystemContext`] is the dependency injection container handed to the task
//! state machine, the job controller and the reconciler. Every external seam
//! (store, dispatcher, scheduler, log sink) is a trait object so tests can run
//! fully in memory.

use crate::config::{ConfigManager, TaskRunnerConfig};
use crate::database::{InMemoryStore, PgStore, Store};
use crate::error::Result;
use crate::events::EventPublisher;
use crate::execution::{Dispatcher, HandleRegistry, TokioDispatcher};
use crate::log_sink::{FileLogSink, LogSink};
use crate::scheduler::{CronScheduler, Scheduler};
use crate::utils::KeyedLock;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub struct SystemContext {
    /// System instance ID
    pub system_id: Uuid,

    pub config: TaskRunnerConfig,

    pub store: Arc<dyn Store>,

    pub dispatcher: Arc<dyn Dispatcher>,

    pub scheduler: Arc<dyn Scheduler>,

    pub log_sink: Arc<dyn LogSink>,

    /// Live update channel
    pub event_publisher: Arc<EventPublisher>,

    pub handles: HandleRegistry,

    /// Serializes control-plane decisions per task
    pub task_locks: KeyedLock,

    /// Serializes signal handling per job
    pub job_locks: KeyedLock,
}

/// A context plus the concrete dispatcher and scheduler, which the owner
/// starts and shuts down.
#[derive(Debug, Clone)]
pub struct SystemParts {
    pub context: Arc<SystemContext>,
    pub dispatcher: Arc<TokioDispatcher>,
    pub scheduler: Arc<CronScheduler>,
}

impl std::fmt::Debug for SystemContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemContext")
            .field("system_id", &self.system_id)
            .field("config", &self.config)
            .field("store", &"Arc<dyn Store>")
            .field("dispatcher", &"Arc<dyn Dispatcher>")
            .field("scheduler", &"Arc<dyn Scheduler>")
            .field("log_sink", &"Arc<dyn LogSink>")
            .finish()
    }
}

impl SystemContext {
    /// Assemble a context from already-built collaborators.
    pub fn new(
        config: TaskRunnerConfig,
        store: Arc<dyn Store>,
        dispatcher: Arc<dyn Dispatcher>,
        scheduler: Arc<dyn Scheduler>,
        log_sink: Arc<dyn LogSink>,
        event_publisher: Arc<EventPublisher>,
    ) -> Self {
        let handles = HandleRegistry::new(Arc::clone(&store), Arc::clone(&dispatcher));
        Self {
            system_id: Uuid::new_v4(),
            config,
            store,
            dispatcher,
            scheduler,
            log_sink,
            event_publisher,
            handles,
            task_locks: KeyedLock::new(),
            job_locks: KeyedLock::new(),
        }
    }

    /// In-memory store, Tokio dispatcher and cron scheduler.
    pub fn in_memory(config: TaskRunnerConfig) -> SystemParts {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        Self::with_store(config, store)
    }

    /// Connect to Postgres using the `database` section and build the rest
    /// of the system around it.
    pub async fn from_config(
        config_manager: Arc<ConfigManager>,
    ) -> Result<SystemParts> {
        let config = config_manager.config().clone();
        info!(
            environment = %config_manager.environment(),
            max_connections = config.database.max_connections,
            "🔧 Initializing SystemContext from configuration"
        );

        let store = PgStore::connect(&config.database.url, config.database.max_connections).await?;
        info!("✅ Database connection established");

        Ok(Self::with_store(config, Arc::new(store)))
    }

    /// Build the rest of the system around `store`.
    pub fn with_store(
        config: TaskRunnerConfig,
        store: Arc<dyn Store>,
    ) -> SystemParts {
        let publisher = Arc::new(EventPublisher::new(config.events.channel_capacity));
        let dispatcher = Arc::new(TokioDispatcher::new(config.dispatcher.worker_concurrency));
        let scheduler = Arc::new(CronScheduler::new(config.scheduler.tick_interval()));
        let log_sink = Arc::new(FileLogSink::new(
            config.logs.tasks_dir.clone(),
            config.logs.jobs_dir.clone(),
            Arc::clone(&publisher),
        ));

        let context = Self::new(
            config,
            store,
            Arc::clone(&dispatcher) as Arc<dyn Dispatcher>,
            Arc::clone(&scheduler) as Arc<dyn Scheduler>,
            log_sink,
            publisher,
        );
        SystemParts {
            context: Arc::new(context),
            dispatcher,
            scheduler,
        }
    }
}
