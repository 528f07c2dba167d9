#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # TaskRunner Core
//!
//! Orchestration core for resumable tasks and condition-driven jobs.
//!
//! ## Overview
//!
//! A **Task** is one run of a simulated workload whose progress (`step`) is
//! checkpointed after every unit of work, so it can be paused, stopped and
//! resumed without losing progress. A **Job** is a recurring producer of
//! tasks: its starting condition begins a new cycle, its stopping condition
//! halts the current task.
//!
//! ## Architecture
//!
//! Two tiers of concurrency:
//!
//! - **Control plane**: [`state_machine::TaskStateMachine`] and
//!   [`orchestration::JobController`] make sequential decisions per entity
//!   (per-task and per-job locks) while many entities are driven at once.
//! - **Data plane**: workloads run on the [`execution::Dispatcher`] worker
//!   pool and report back through completion callbacks.
//!
//! The task row is the single source of truth shared by both tiers; every
//! write is version-checked, and workload checkpoints are discarded once the
//! writing execution no longer owns the task.
//!
//! ## Module Organization
//!
//! - [`models`] - Tasks, jobs, conditions and execution handles
//! - [`state_machine`] - Task lifecycle, guards and transition actions
//! - [`conditions`] - Time and max-records condition evaluators
//! - [`orchestration`] - Job controller, signal processing, reconciliation, bootstrap
//! - [`execution`] - Dispatcher, handle registry and the simulated workload
//! - [`scheduler`] - Recurring schedule registration
//! - [`database`] - Store trait with in-memory and PostgreSQL implementations
//! - [`log_sink`] - Per-entity log folders
//! - [`events`] - Live update channel
//! - [`config`] - Configuration management
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use taskrunner_core::config::TaskRunnerConfig;
//! use taskrunner_core::models::{NewTask, TaskType};
//! use taskrunner_core::orchestration::TaskRunnerBootstrap;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let system = TaskRunnerBootstrap::in_memory(TaskRunnerConfig::default()).await?;
//!
//! // creating a task launches it
//! let task = system.tasks.create_task(NewTask::new(TaskType::Small)).await?;
//! system.tasks.pause(task.task_id).await?;
//! system.tasks.resume(task.task_id).await?;
//! # Ok(())
//! # }
//! ```

pub mod conditions;
pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod events;
pub mod execution;
pub mod log_sink;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod scheduler;
pub mod state_machine;
pub mod system_context;
pub mod utils;

pub use config::{ConfigManager, TaskRunnerConfig};
pub use error::{Result, TaskRunnerError};
pub use models::{Job, NewJob, NewTask, Task, TaskType};
pub use orchestration::{JobController, TaskRunnerBootstrap, TaskRunnerSystem};
pub use state_machine::{TaskStateMachine, TaskStatus, TransitionOutcome};
pub use system_context::SystemContext;
