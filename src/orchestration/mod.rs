//! # Orchestration
//!
//! The control plane above individual tasks: job lifecycle and condition
//! provisioning, start/stop signal handling, orphan reconciliation and
//! system bootstrap.
//!
//! ## Core Components
//!
//! - **JobController**: creates, pauses, resumes and deletes jobs, keeping
//!   schedule registrations in step with each job's `enabled` flag
//! - **JobSignalProcessor**: turns start/stop signals into task creation,
//!   resume, pause or stop
//! - **Reconciler**: resolves tasks left active without a live execution
//! - **TaskRunnerBootstrap**: wires everything together and starts it

pub mod bootstrap;
pub mod job_controller;
pub mod job_signals;
pub mod reconciler;

pub use bootstrap::{BootstrapConfig, SystemStatus, TaskRunnerBootstrap, TaskRunnerSystem};
pub use job_controller::JobController;
pub use job_signals::{JobSignalProcessor, SignalOutcome};
pub use reconciler::{ReconcileReport, Reconciler};
