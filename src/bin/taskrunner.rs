//! # taskrunner
//!
//! Command-line entry point: apply migrations, serve the orchestration core
//! against PostgreSQL, or drive a single task or job from the shell.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use taskrunner_core::config::ConfigManager;
use taskrunner_core::constants::DEFAULT_LOG_EXCERPT_LINES;
use taskrunner_core::database::PgStore;
use taskrunner_core::logging::init_structured_logging;
use taskrunner_core::models::TaskEdit;
use taskrunner_core::orchestration::{BootstrapConfig, JobController, TaskRunnerBootstrap};
use taskrunner_core::state_machine::{TaskStateMachine, TaskStatus};
use taskrunner_core::system_context::SystemContext;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "taskrunner")]
#[command(about = "Run resumable tasks and condition-driven jobs")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration directory (default: config)
    #[arg(short, long, global = true)]
    config_dir: Option<PathBuf>,

    /// Environment name; overrides TASKRUNNER_ENV
    #[arg(short, long, global = true)]
    env: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,

    /// Run the scheduler, dispatcher and signal listener until Ctrl-C
    Serve {
        /// Apply pending migrations first
        #[arg(long)]
        migrate: bool,

        /// Seconds in-flight workloads get to finish on shutdown
        #[arg(long, default_value_t = 30)]
        grace_secs: u64,
    },

    /// Run an existing task inline until it finishes or halts
    RunTask {
        task_id: Uuid,
    },

    /// Deliver one start signal to a job and wait for its workload
    RunJob {
        job_id: Uuid,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Serve { migrate, grace_secs } = cli.command {
        return serve(cli.config_dir, cli.env, migrate, grace_secs).await;
    }

    let config = load_config(cli.config_dir, cli.env.as_deref())?;
    init_structured_logging(config.config().logging.json);

    match cli.command {
        Commands::Migrate => migrate(&config).await,
        Commands::RunTask { task_id } => run_task(config, task_id).await,
        Commands::RunJob { job_id } => run_job(config, job_id).await,
        Commands::Serve { .. } => Ok(()),
    }
}

fn load_config(config_dir: Option<PathBuf>, env: Option<&str>) -> anyhow::Result<Arc<ConfigManager>> {
    let manager = match env {
        Some(env) => ConfigManager::load_from_directory_with_env(config_dir, env),
        None => ConfigManager::load_from_directory(config_dir),
    };
    manager.context("failed to load configuration")
}

async fn migrate(config: &ConfigManager) -> anyhow::Result<()> {
    let database = &config.config().database;
    let store = PgStore::connect(&database.url, database.max_connections)
        .await
        .context("failed to connect to the database")?;
    store.migrate().await.context("failed to apply migrations")?;
    info!("✅ Migrations applied");
    Ok(())
}

async fn serve(
    config_dir: Option<PathBuf>,
    env: Option<String>,
    run_migrations: bool,
    grace_secs: u64,
) -> anyhow::Result<()> {
    let system = TaskRunnerBootstrap::bootstrap(BootstrapConfig {
        config_directory: config_dir,
        environment_override: env,
        run_migrations,
    })
    .await
    .context("failed to start the task runner")?;

    info!(status = ?system.status(), "Serving; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    system.shutdown(Duration::from_secs(grace_secs)).await;
    Ok(())
}

/// Switch the task to inline execution and drive it from its current status.
async fn run_task(config: Arc<ConfigManager>, task_id: Uuid) -> anyhow::Result<()> {
    let parts = SystemContext::from_config(config).await?;
    let machine = TaskStateMachine::new(Arc::clone(&parts.context));

    let task = machine.get_task(task_id).await?;
    if task.status == TaskStatus::Running {
        bail!("task {task_id} is already running");
    }
    if !task.debug_mode {
        machine
            .update_task(
                task_id,
                TaskEdit {
                    debug_mode: Some(true),
                    ..Default::default()
                },
            )
            .await?;
    }

    let outcome = match task.status {
        TaskStatus::Paused | TaskStatus::Stopped => machine.resume(task_id).await?,
        TaskStatus::Starting => machine.launch(task_id, false).await?,
        _ => machine.restart(task_id).await?,
    };
    if outcome.is_rejected() {
        bail!("task {task_id} could not be launched: {outcome:?}");
    }

    for line in machine.log_excerpt(task_id, DEFAULT_LOG_EXCERPT_LINES).await? {
        println!("{line}");
    }
    let task = machine.get_task(task_id).await?;
    println!("{task} ended {} at step {}", task.status, task.step);
    Ok(())
}

async fn run_job(config: Arc<ConfigManager>, job_id: Uuid) -> anyhow::Result<()> {
    let parts = SystemContext::from_config(config).await?;
    let controller = JobController::new(TaskStateMachine::new(Arc::clone(&parts.context)));

    let outcome = controller.signals().on_start_signal(job_id).await?;
    println!("Start signal: {outcome:?}");

    let dispatcher = Arc::clone(&parts.dispatcher);
    tokio::select! {
        _ = async {
            while dispatcher.active_count() > 0 {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        } => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; terminating in-flight workloads");
            dispatcher.shutdown(Duration::from_secs(5)).await;
        }
    }

    let detail = controller.job_detail(job_id).await?;
    if let Some(task) = detail.tasks.first() {
        println!("{task} is {} at step {}", task.status, task.step);
    }
    Ok(())
}
