//! # System Bootstrap
//!
//! One way to bring the whole system up, whatever the store: reconcile
//! orphaned tasks, restore schedule registrations, start the cron tick loop
//! and the signal listener. The returned [`TaskRunnerSystem`] owns the
//! running pieces and shuts them down in order.

use super::job_controller::JobController;
use super::reconciler::{ReconcileReport, Reconciler};
use crate::config::{ConfigManager, TaskRunnerConfig};
use crate::database::PgStore;
use crate::error::Result;
use crate::execution::{DispatcherStats, TokioDispatcher};
use crate::logging::init_structured_logging;
use crate::scheduler::CronScheduler;
use crate::state_machine::TaskStateMachine;
use crate::system_context::{SystemContext, SystemParts};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Bootstrap configuration
#[derive(Debug, Clone, Default)]
pub struct BootstrapConfig {
    /// Custom configuration directory (None = `config/`)
    pub config_directory: Option<PathBuf>,
    /// Environment override (None = auto-detect)
    pub environment_override: Option<String>,
    /// Apply pending migrations before starting
    pub run_migrations: bool,
}

/// System status information
#[derive(Debug, Clone, PartialEq)]
pub struct SystemStatus {
    pub running: bool,
    pub environment: String,
    pub dispatcher: DispatcherStats,
    pub registered_schedules: usize,
    pub startup_reconciliation: Option<ReconcileReport>,
}

/// Running system handle for lifecycle management
pub struct TaskRunnerSystem {
    pub context: Arc<SystemContext>,
    pub tasks: TaskStateMachine,
    pub jobs: JobController,
    environment: String,
    dispatcher: Arc<TokioDispatcher>,
    scheduler: Arc<CronScheduler>,
    shutdown: CancellationToken,
    listener: Option<JoinHandle<()>>,
    startup_reconciliation: Option<ReconcileReport>,
}

impl std::fmt::Debug for TaskRunnerSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunnerSystem")
            .field("system_id", &self.context.system_id)
            .field("environment", &self.environment)
            .field("running", &self.is_running())
            .finish()
    }
}

impl TaskRunnerSystem {
    /// Start the background pieces around an assembled context.
    pub async fn start(parts: SystemParts, environment: impl Into<String>) -> Result<Self> {
        let SystemParts {
            context,
            dispatcher,
            scheduler,
        } = parts;
        let environment = environment.into();
        let tasks = TaskStateMachine::new(Arc::clone(&context));
        let jobs = JobController::new(tasks.clone());

        let startup_reconciliation = if context.config.reconciliation.on_startup {
            Some(Reconciler::new(tasks.clone()).sweep().await?)
        } else {
            None
        };

        jobs.restore_schedules().await?;

        let (sender, receiver) = mpsc::unbounded_channel();
        scheduler.start(sender)?;
        let shutdown = CancellationToken::new();
        let listener = jobs.spawn_signal_listener(receiver, shutdown.child_token());

        info!(
            system_id = %context.system_id,
            environment = %environment,
            schedules = scheduler.len(),
            "🚀 Task runner started"
        );

        Ok(Self {
            context,
            tasks,
            jobs,
            environment,
            dispatcher,
            scheduler,
            shutdown,
            listener: Some(listener),
            startup_reconciliation,
        })
    }

    pub fn is_running(&self) -> bool {
        self.listener.is_some() && !self.shutdown.is_cancelled()
    }

    pub fn status(&self) -> SystemStatus {
        SystemStatus {
            running: self.is_running(),
            environment: self.environment.clone(),
            dispatcher: self.dispatcher.stats(),
            registered_schedules: self.scheduler.len(),
            startup_reconciliation: self.startup_reconciliation,
        }
    }

    /// Stop scheduling, stop the listener, then let in-flight workloads
    /// drain for up to `grace`.
    pub async fn shutdown(mut self, grace: Duration) {
        info!("🛑 Task runner shutdown requested");
        self.scheduler.shutdown().await;
        self.shutdown.cancel();
        if let Some(listener) = self.listener.take() {
            if let Err(e) = listener.await {
                warn!(error = %e, "Signal listener ended abnormally");
            }
        }
        self.dispatcher.shutdown(grace).await;
        info!("Task runner stopped");
    }
}

/// Entry points that build and start a [`TaskRunnerSystem`]
pub struct TaskRunnerBootstrap;

impl TaskRunnerBootstrap {
    /// Load configuration, connect to Postgres and start the system.
    pub async fn bootstrap(config: BootstrapConfig) -> Result<TaskRunnerSystem> {
        let config_manager = match &config.environment_override {
            Some(env) => ConfigManager::load_from_directory_with_env(config.config_directory.clone(), env)?,
            None => ConfigManager::load_from_directory(config.config_directory.clone())?,
        };
        init_structured_logging(config_manager.config().logging.json);
        info!(
            environment = %config_manager.environment(),
            "✅ BOOTSTRAP: Configuration loaded"
        );

        let settings = config_manager.config();
        let store = PgStore::connect(&settings.database.url, settings.database.max_connections).await?;
        if config.run_migrations {
            store.migrate().await?;
            info!("✅ BOOTSTRAP: Migrations applied");
        }

        let parts = SystemContext::with_store(settings.clone(), Arc::new(store));
        TaskRunnerSystem::start(parts, config_manager.environment()).await
    }

    /// Start a system on the in-memory store.
    pub async fn in_memory(config: TaskRunnerConfig) -> Result<TaskRunnerSystem> {
        config.validate()?;
        TaskRunnerSystem::start(SystemContext::in_memory(config), "in_memory").await
    }
}
